//! Install/uninstall/enable/disable/update/link orchestration.
//!
//! Each mutation is a store change plus a registry commit, sequenced so that
//! a failure at any point leaves the prior state authoritative. Operations on
//! the same (namespace, name) key are serialized; distinct skills proceed
//! concurrently.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Weak},
};

use {async_trait::async_trait, tokio::sync::Mutex, tracing::info};

use crate::{
    document::{InstallSource, InstalledSkillRecord, LinkMode, RegistryStore},
    error::Result,
    manifest::SkillManifest,
    resolve::Namespace,
    store::SkillStore,
};

/// Lifecycle failures a caller can act on. Store and registry I/O failures
/// surface through [`crate::error::Error`] instead.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("skill '{name}' is already installed in namespace '{namespace}'")]
    AlreadyInstalled { name: String, namespace: Namespace },
    #[error("skill '{name}' is not installed in namespace '{namespace}'")]
    NotInstalled { name: String, namespace: Namespace },
    #[error("source manifest declares '{found}', expected '{expected}'")]
    NameMismatch { expected: String, found: String },
}

/// Hook for stopping a skill's process before its files are mutated.
///
/// The supervisor registers itself here; when no supervisor is running the
/// hook is absent and lifecycle operations proceed without quiescing.
#[async_trait]
pub trait ProcessQuiescer: Send + Sync {
    async fn quiesce(&self, namespace: &Namespace, name: &str);
}

/// Coordinates skill directory contents with the registry document.
pub struct LifecycleManager {
    store: SkillStore,
    registry: Arc<RegistryStore>,
    quiescer: Mutex<Option<Weak<dyn ProcessQuiescer>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(store: SkillStore, registry: Arc<RegistryStore>) -> Self {
        Self {
            store,
            registry,
            quiescer: Mutex::new(None),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SkillStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    /// Register the running supervisor as the process quiescer. Held weakly
    /// so a stopped supervisor never keeps lifecycle operations waiting.
    pub async fn set_quiescer(&self, quiescer: Weak<dyn ProcessQuiescer>) {
        *self.quiescer.lock().await = Some(quiescer);
    }

    async fn quiesce(&self, namespace: &Namespace, name: &str) {
        let quiescer = self.quiescer.lock().await.clone();
        if let Some(q) = quiescer.and_then(|w| w.upgrade()) {
            q.quiesce(namespace, name).await;
        }
    }

    async fn lock_for(&self, namespace: &Namespace, name: &str) -> Arc<Mutex<()>> {
        let key = format!("{namespace}/{name}");
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_default().clone()
    }

    /// Install a skill from a local directory.
    ///
    /// With `force`, an existing install is replaced in place, keeping its
    /// enabled flag and original install time.
    pub async fn install(
        &self,
        source: &Path,
        namespace: &Namespace,
        force: bool,
    ) -> Result<InstalledSkillRecord> {
        let manifest = SkillManifest::load(source)?;
        let name = manifest.name.clone();

        let lock = self.lock_for(namespace, &name).await;
        let _guard = lock.lock().await;

        let existing = self.registry.load()?.get(namespace, &name).cloned();
        if existing.is_some() && !force {
            return Err(LifecycleError::AlreadyInstalled {
                name,
                namespace: namespace.clone(),
            }
            .into());
        }
        if existing.is_some() {
            self.quiesce(namespace, &name).await;
        }

        let staged = self.store.stage(source)?;
        let guard = self.store.commit(staged, &name, namespace)?;

        let mut record = InstalledSkillRecord::new(
            namespace.clone(),
            manifest,
            InstallSource::LocalPath {
                path: source.to_path_buf(),
            },
            LinkMode::Copy,
            true,
        );
        if let Some(prior) = &existing {
            record.enabled = prior.enabled;
            record.installed_at = prior.installed_at;
        }

        let committed = record.clone();
        match self.registry.commit(move |doc| {
            doc.upsert(record);
            Ok(())
        }) {
            Ok(()) => {
                guard.finish();
                info!(name, namespace = %namespace, version = %committed.manifest.version, "installed skill");
                Ok(committed)
            },
            Err(e) => {
                guard.rollback();
                Err(e)
            },
        }
    }

    /// Replace an installed skill with a new source snapshot.
    ///
    /// The source manifest must declare the same name; enabled state and the
    /// original install time carry over.
    pub async fn update(
        &self,
        name: &str,
        source: &Path,
        namespace: &Namespace,
    ) -> Result<InstalledSkillRecord> {
        let manifest = SkillManifest::load(source)?;
        if manifest.name != name {
            return Err(LifecycleError::NameMismatch {
                expected: name.to_string(),
                found: manifest.name,
            }
            .into());
        }

        let lock = self.lock_for(namespace, name).await;
        let _guard = lock.lock().await;

        let prior = self
            .registry
            .load()?
            .get(namespace, name)
            .cloned()
            .ok_or_else(|| LifecycleError::NotInstalled {
                name: name.to_string(),
                namespace: namespace.clone(),
            })?;

        self.quiesce(namespace, name).await;

        let staged = self.store.stage(source)?;
        let guard = self.store.commit(staged, name, namespace)?;

        let mut record = InstalledSkillRecord::new(
            namespace.clone(),
            manifest,
            InstallSource::LocalPath {
                path: source.to_path_buf(),
            },
            LinkMode::Copy,
            prior.enabled,
        );
        record.installed_at = prior.installed_at;

        let committed = record.clone();
        match self.registry.commit(move |doc| {
            doc.upsert(record);
            Ok(())
        }) {
            Ok(()) => {
                guard.finish();
                info!(name, namespace = %namespace, version = %committed.manifest.version, "updated skill");
                Ok(committed)
            },
            Err(e) => {
                guard.rollback();
                Err(e)
            },
        }
    }

    /// Remove a skill's files and its registry record.
    pub async fn uninstall(&self, name: &str, namespace: &Namespace) -> Result<()> {
        let lock = self.lock_for(namespace, name).await;
        let _guard = lock.lock().await;

        if self.registry.load()?.get(namespace, name).is_none() {
            return Err(LifecycleError::NotInstalled {
                name: name.to_string(),
                namespace: namespace.clone(),
            }
            .into());
        }

        self.quiesce(namespace, name).await;

        let guard = self.store.remove(name, namespace)?;
        let ns = namespace.clone();
        let skill = name.to_string();
        match self.registry.commit(move |doc| {
            doc.remove(&ns, &skill);
            Ok(())
        }) {
            Ok(()) => {
                guard.finish();
                info!(name, namespace = %namespace, "uninstalled skill");
                Ok(())
            },
            Err(e) => {
                guard.rollback();
                Err(e)
            },
        }
    }

    /// Flip the enabled flag. Files on disk are untouched; disabling stops
    /// any running process first.
    pub async fn set_enabled(&self, name: &str, namespace: &Namespace, enabled: bool) -> Result<()> {
        let lock = self.lock_for(namespace, name).await;
        let _guard = lock.lock().await;

        if !enabled {
            self.quiesce(namespace, name).await;
        }

        let ns = namespace.clone();
        let skill = name.to_string();
        self.registry.commit(move |doc| {
            if doc.set_enabled(&ns, &skill, enabled) {
                Ok(())
            } else {
                Err(LifecycleError::NotInstalled {
                    name: skill.clone(),
                    namespace: ns.clone(),
                }
                .into())
            }
        })?;
        info!(name, namespace = %namespace, enabled, "set skill enabled flag");
        Ok(())
    }

    /// Link a development checkout into the store without copying. Edits to
    /// the source take effect on the next process start.
    pub async fn link(&self, source: &Path, namespace: &Namespace) -> Result<InstalledSkillRecord> {
        let manifest = SkillManifest::load(source)?;
        let name = manifest.name.clone();

        let lock = self.lock_for(namespace, &name).await;
        let _guard = lock.lock().await;

        if self.registry.load()?.get(namespace, &name).is_some() {
            return Err(LifecycleError::AlreadyInstalled {
                name,
                namespace: namespace.clone(),
            }
            .into());
        }

        self.store.link(source, &name, namespace)?;
        let record = InstalledSkillRecord::new(
            namespace.clone(),
            manifest,
            InstallSource::LinkedPath {
                path: source.to_path_buf(),
            },
            LinkMode::Symlink,
            true,
        );

        let committed = record.clone();
        match self.registry.commit(move |doc| {
            doc.upsert(record);
            Ok(())
        }) {
            Ok(()) => {
                info!(name, namespace = %namespace, "linked skill");
                Ok(committed)
            },
            Err(e) => {
                // Undo the symlink; the registry never saw this record.
                if let Ok(guard) = self.store.remove(&name, namespace) {
                    guard.finish();
                }
                Err(e)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::error::Error;

    fn skill_source(tmp: &Path, name: &str, version: &str) -> PathBuf {
        let dir = tmp.join(format!("src-{name}-{version}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("skill.yaml"),
            format!("name: {name}\nversion: {version}\nprimitives: [capability]\nentry: serve.sh\n"),
        )
        .unwrap();
        std::fs::write(dir.join("serve.sh"), "#!/bin/sh\ncat\n").unwrap();
        dir
    }

    fn manager(tmp: &Path) -> LifecycleManager {
        let home = tmp.join("home");
        let registry = Arc::new(RegistryStore::new(home.join("registry.json")));
        LifecycleManager::new(SkillStore::new(home), registry)
    }

    struct RecordingQuiescer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProcessQuiescer for RecordingQuiescer {
        async fn quiesce(&self, _namespace: &Namespace, _name: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_install_then_uninstall_leaves_no_residue() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let source = skill_source(tmp.path(), "echo", "1.0.0");
        let ns = Namespace::Global;

        let record = mgr.install(&source, &ns, false).await.unwrap();
        assert!(record.enabled);
        assert!(mgr.store().skill_dir("echo", &ns).join("skill.yaml").is_file());
        assert!(mgr.registry().load().unwrap().get(&ns, "echo").is_some());

        mgr.uninstall("echo", &ns).await.unwrap();
        assert!(!mgr.store().skill_dir("echo", &ns).exists());
        assert!(mgr.registry().load().unwrap().get(&ns, "echo").is_none());
    }

    #[tokio::test]
    async fn test_double_install_without_force_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let source = skill_source(tmp.path(), "echo", "1.0.0");
        let ns = Namespace::Global;

        mgr.install(&source, &ns, false).await.unwrap();
        let err = mgr.install(&source, &ns, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::AlreadyInstalled { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_install_preserves_enabled_and_install_time() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ns = Namespace::Global;

        let v1 = skill_source(tmp.path(), "echo", "1.0.0");
        let first = mgr.install(&v1, &ns, false).await.unwrap();
        mgr.set_enabled("echo", &ns, false).await.unwrap();

        let v2 = skill_source(tmp.path(), "echo", "2.0.0");
        let second = mgr.install(&v2, &ns, true).await.unwrap();
        assert_eq!(second.manifest.version.to_string(), "2.0.0");
        assert!(!second.enabled);
        assert_eq!(second.installed_at, first.installed_at);
    }

    #[tokio::test]
    async fn test_update_swaps_snapshot_and_checks_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ns = Namespace::Global;

        let v1 = skill_source(tmp.path(), "echo", "1.0.0");
        mgr.install(&v1, &ns, false).await.unwrap();

        let v2 = skill_source(tmp.path(), "echo", "1.1.0");
        let updated = mgr.update("echo", &v2, &ns).await.unwrap();
        assert_eq!(updated.manifest.version.to_string(), "1.1.0");

        let other = skill_source(tmp.path(), "other", "1.0.0");
        let err = mgr.update("echo", &other, &ns).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::NameMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_enable_disable_touches_only_the_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ns = Namespace::Global;
        let source = skill_source(tmp.path(), "echo", "1.0.0");
        mgr.install(&source, &ns, false).await.unwrap();

        mgr.set_enabled("echo", &ns, false).await.unwrap();
        let doc = mgr.registry().load().unwrap();
        let record = doc.get(&ns, "echo").unwrap();
        assert!(!record.enabled);
        // Files are untouched by the flag flip.
        assert!(mgr.store().skill_dir("echo", &ns).join("skill.yaml").is_file());

        mgr.set_enabled("echo", &ns, true).await.unwrap();
        assert!(mgr.registry().load().unwrap().get(&ns, "echo").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_enable_unknown_skill_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let err = mgr
            .set_enabled("ghost", &Namespace::Global, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::NotInstalled { .. })
        ));
    }

    #[tokio::test]
    async fn test_disable_and_uninstall_quiesce_the_process() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ns = Namespace::Global;
        let source = skill_source(tmp.path(), "echo", "1.0.0");
        mgr.install(&source, &ns, false).await.unwrap();

        let quiescer = Arc::new(RecordingQuiescer {
            calls: AtomicUsize::new(0),
        });
        mgr.set_quiescer(Arc::downgrade(&quiescer) as Weak<dyn ProcessQuiescer>)
            .await;

        mgr.set_enabled("echo", &ns, false).await.unwrap();
        assert_eq!(quiescer.calls.load(Ordering::SeqCst), 1);

        mgr.uninstall("echo", &ns).await.unwrap();
        assert_eq!(quiescer.calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_records_symlink_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ns = Namespace::Global;
        let source = skill_source(tmp.path(), "dev", "0.1.0");

        let record = mgr.link(&source, &ns).await.unwrap();
        assert_eq!(record.link_mode, LinkMode::Symlink);
        assert!(matches!(record.source, InstallSource::LinkedPath { .. }));
        assert!(mgr.store().skill_dir("dev", &ns).is_symlink());

        let err = mgr.link(&source, &ns).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::AlreadyInstalled { .. })
        ));
    }
}
