//! On-disk skill store: staging, atomic commit, removal, and dev links.
//!
//! Layout under the skskills home:
//!
//! ```text
//! <home>/installed/<name>/          global installs
//! <home>/agents/<agent>/<name>/     agent-scoped installs
//! <home>/staging/                   in-flight installs (never visible)
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    resolve::Namespace,
};

/// Owns the skill directory tree. All mutations are two-phase so a crash or
/// failed registry commit leaves the prior version authoritative.
#[derive(Debug, Clone)]
pub struct SkillStore {
    root: PathBuf,
}

impl SkillStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Final directory for a skill in a namespace.
    pub fn skill_dir(&self, name: &str, namespace: &Namespace) -> PathBuf {
        match namespace {
            Namespace::Global => self.root.join("installed").join(name),
            Namespace::Agent(agent) => self.root.join("agents").join(agent).join(name),
        }
    }

    /// Copy a source directory into a fresh staging directory.
    ///
    /// The staged copy is invisible under any final skill name; dropping the
    /// returned handle without committing removes it.
    pub fn stage(&self, source: &Path) -> Result<StagedSkill> {
        if !source.is_dir() {
            return Err(Error::message(format!(
                "source is not a directory: {}",
                source.display()
            )));
        }
        let staging = self.staging_dir();
        std::fs::create_dir_all(&staging)?;

        let dir = staging.join(unique_stage_name());
        copy_dir(source, &dir)?;
        debug!(staged = %dir.display(), source = %source.display(), "staged skill");
        Ok(StagedSkill { dir })
    }

    /// Atomically move a staged skill into place under its final name.
    ///
    /// Any prior version is parked as `<name>.prev` until the caller settles
    /// the returned guard: `finish()` purges it, `rollback()` restores it.
    pub fn commit(
        &self,
        staged: StagedSkill,
        name: &str,
        namespace: &Namespace,
    ) -> Result<CommitGuard> {
        let final_dir = self.skill_dir(name, namespace);
        if let Some(parent) = final_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let prev_dir = sibling(&final_dir, ".prev")?;
        if prev_dir.exists() {
            // Stale leftovers from an interrupted earlier commit.
            std::fs::remove_dir_all(&prev_dir)?;
        }

        let had_prior = final_dir.exists() || final_dir.is_symlink();
        if had_prior {
            std::fs::rename(&final_dir, &prev_dir)?;
        }
        if let Err(e) = std::fs::rename(staged.path(), &final_dir) {
            if had_prior {
                let _ = std::fs::rename(&prev_dir, &final_dir);
            }
            return Err(e.into());
        }
        staged.disarm();

        Ok(CommitGuard {
            final_dir,
            prev_dir: had_prior.then_some(prev_dir),
        })
    }

    /// Detach a skill directory ahead of a registry commit.
    ///
    /// The directory is renamed to `<name>.trash`; `finish()` deletes it,
    /// `rollback()` puts it back.
    pub fn remove(&self, name: &str, namespace: &Namespace) -> Result<RemoveGuard> {
        let final_dir = self.skill_dir(name, namespace);
        let trash_dir = sibling(&final_dir, ".trash")?;
        if trash_dir.exists() {
            std::fs::remove_dir_all(&trash_dir)?;
        }
        let detached = if final_dir.exists() || final_dir.is_symlink() {
            std::fs::rename(&final_dir, &trash_dir)?;
            true
        } else {
            false
        };
        Ok(RemoveGuard {
            final_dir,
            trash_dir,
            detached,
        })
    }

    /// Create a live reference to a development checkout instead of a copy.
    #[cfg(unix)]
    pub fn link(&self, source: &Path, name: &str, namespace: &Namespace) -> Result<PathBuf> {
        let final_dir = self.skill_dir(name, namespace);
        if let Some(parent) = final_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if final_dir.exists() || final_dir.is_symlink() {
            return Err(Error::message(format!(
                "store path already exists: {}",
                final_dir.display()
            )));
        }
        let source = std::fs::canonicalize(source)?;
        std::os::unix::fs::symlink(&source, &final_dir)?;
        Ok(final_dir)
    }

    #[cfg(not(unix))]
    pub fn link(&self, _source: &Path, _name: &str, _namespace: &Namespace) -> Result<PathBuf> {
        Err(Error::message("linked installs require a unix platform"))
    }
}

/// A staged-but-uncommitted skill copy. Cleaned up on drop.
pub struct StagedSkill {
    dir: PathBuf,
}

impl StagedSkill {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn disarm(mut self) {
        self.dir = PathBuf::new();
    }
}

impl Drop for StagedSkill {
    fn drop(&mut self) {
        if !self.dir.as_os_str().is_empty() && self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to clean staging dir");
            }
        }
    }
}

/// Settles a two-phase install commit.
#[must_use = "call finish() after the registry commit, or rollback() on failure"]
pub struct CommitGuard {
    final_dir: PathBuf,
    prev_dir: Option<PathBuf>,
}

impl CommitGuard {
    /// Registry commit succeeded: purge the parked prior version.
    pub fn finish(self) {
        if let Some(prev) = &self.prev_dir {
            if let Err(e) = remove_path(prev) {
                warn!(dir = %prev.display(), error = %e, "failed to purge prior skill version");
            }
        }
    }

    /// Registry commit failed: restore the prior version (or remove the new
    /// directory entirely if this was a fresh install).
    pub fn rollback(self) {
        if let Err(e) = remove_path(&self.final_dir) {
            warn!(dir = %self.final_dir.display(), error = %e, "rollback: failed to remove new version");
            return;
        }
        if let Some(prev) = &self.prev_dir {
            if let Err(e) = std::fs::rename(prev, &self.final_dir) {
                warn!(dir = %prev.display(), error = %e, "rollback: failed to restore prior version");
            }
        }
    }
}

/// Settles a two-phase removal.
#[must_use = "call finish() after the registry commit, or rollback() on failure"]
pub struct RemoveGuard {
    final_dir: PathBuf,
    trash_dir: PathBuf,
    detached: bool,
}

impl RemoveGuard {
    pub fn finish(self) {
        if self.detached {
            if let Err(e) = remove_path(&self.trash_dir) {
                warn!(dir = %self.trash_dir.display(), error = %e, "failed to purge removed skill");
            }
        }
    }

    pub fn rollback(self) {
        if self.detached {
            if let Err(e) = std::fs::rename(&self.trash_dir, &self.final_dir) {
                warn!(dir = %self.trash_dir.display(), error = %e, "rollback: failed to restore skill dir");
            }
        }
    }
}

fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::message(format!("invalid store path: {}", dir.display())))?;
    Ok(dir.with_file_name(format!("{name}{suffix}")))
}

/// Remove a path that may be a directory or a symlink.
fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_symlink() {
        std::fs::remove_file(path)
    } else if path.exists() {
        std::fs::remove_dir_all(path)
    } else {
        Ok(())
    }
}

fn unique_stage_name() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("stage-{}-{nanos}", std::process::id())
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to)?;
            #[cfg(unix)]
            {
                // Preserve the executable bit so entry scripts stay runnable.
                let perms = std::fs::metadata(&from)?.permissions();
                std::fs::set_permissions(&to, perms)?;
            }
        } else {
            debug!(path = %from.display(), "skipping non-regular file during stage");
        }
    }
    Ok(())
}
