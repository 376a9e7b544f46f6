//! The durable registry document and its single-writer store.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    fd_lock::RwLock,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use crate::{
    error::{Error, Result},
    manifest::SkillManifest,
    resolve::Namespace,
};

/// Where an installed skill came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InstallSource {
    LocalPath { path: PathBuf },
    GitUrl { url: String },
    LinkedPath { path: PathBuf },
}

/// How the skill's store directory is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Copy,
    Symlink,
}

/// One installed skill, keyed by (namespace, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledSkillRecord {
    pub namespace: Namespace,
    pub name: String,
    pub manifest: SkillManifest,
    pub source: InstallSource,
    pub enabled: bool,
    pub link_mode: LinkMode,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstalledSkillRecord {
    pub fn new(
        namespace: Namespace,
        manifest: SkillManifest,
        source: InstallSource,
        link_mode: LinkMode,
        enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            namespace,
            name: manifest.name.clone(),
            manifest,
            source,
            enabled,
            link_mode,
            installed_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> (&Namespace, &str) {
        (&self.namespace, &self.name)
    }
}

/// The persisted registry: ordered records plus a revision counter that
/// increases on every committed mutation. Consumers must treat a changed
/// revision as "re-read before acting".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: u32,
    pub revision: u64,
    #[serde(default)]
    pub records: Vec<InstalledSkillRecord>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: 1,
            revision: 0,
            records: Vec::new(),
        }
    }
}

impl RegistryDocument {
    pub fn get(&self, namespace: &Namespace, name: &str) -> Option<&InstalledSkillRecord> {
        self.records
            .iter()
            .find(|r| r.namespace == *namespace && r.name == name)
    }

    /// Insert or replace the record for its (namespace, name) key, keeping
    /// the original position on replace.
    pub fn upsert(&mut self, record: InstalledSkillRecord) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.namespace == record.namespace && r.name == record.name)
        {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn remove(&mut self, namespace: &Namespace, name: &str) -> bool {
        let before = self.records.len();
        self.records
            .retain(|r| !(r.namespace == *namespace && r.name == name));
        self.records.len() != before
    }

    pub fn set_enabled(&mut self, namespace: &Namespace, name: &str, enabled: bool) -> bool {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.namespace == *namespace && r.name == name)
        {
            record.enabled = enabled;
            record.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// All records in one namespace, in insertion order. The records borrow
    /// only from the document, not from the namespace filter.
    pub fn records_in<'a>(
        &'a self,
        namespace: &Namespace,
    ) -> impl Iterator<Item = &'a InstalledSkillRecord> {
        self.records.iter().filter(move |r| r.namespace == *namespace)
    }
}

/// Single-writer store for the registry document.
///
/// Writers serialize on an `fd-lock` file lock and commit with a temp-file +
/// rename, so readers always observe a complete document at some revision.
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a snapshot, returning an empty revision-0 document if missing.
    pub fn load(&self) -> Result<RegistryDocument> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "registry file not found, using empty");
            return Ok(RegistryDocument::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Current revision without deserializing the full record list.
    pub fn revision(&self) -> Result<u64> {
        Ok(self.load()?.revision)
    }

    /// Run a mutation as a single committed revision bump.
    ///
    /// The document is re-read under the file lock, mutated, and written
    /// atomically. If `mutate` fails nothing is written and the revision is
    /// unchanged.
    pub fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut RegistryDocument) -> Result<T>,
    ) -> Result<T> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| Error::message(format!("registry lock failed: {e}")))?;

        let mut doc = self.load()?;
        let out = mutate(&mut doc)?;
        doc.revision += 1;

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), revision = doc.revision, "committed registry");
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> SkillManifest {
        let raw = format!("name: {name}\nversion: 1.0.0\nprimitives: [knowledge]\nentry: serve.sh\n");
        SkillManifest::validate(&raw).unwrap()
    }

    fn record(ns: Namespace, name: &str) -> InstalledSkillRecord {
        InstalledSkillRecord::new(
            ns,
            manifest(name),
            InstallSource::LocalPath {
                path: "/tmp/src".into(),
            },
            LinkMode::Copy,
            true,
        )
    }

    #[test]
    fn test_load_missing_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(tmp.path().join("registry.json"));
        let doc = store.load().unwrap();
        assert_eq!(doc.revision, 0);
        assert!(doc.records.is_empty());
    }

    #[test]
    fn test_commit_bumps_revision_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(tmp.path().join("registry.json"));

        store
            .commit(|doc| {
                doc.upsert(record(Namespace::Global, "echo"));
                Ok(())
            })
            .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.revision, 1);
        assert!(doc.get(&Namespace::Global, "echo").is_some());

        store
            .commit(|doc| {
                assert!(doc.set_enabled(&Namespace::Global, "echo", false));
                Ok(())
            })
            .unwrap();
        assert_eq!(store.revision().unwrap(), 2);
        assert!(!store.load().unwrap().records[0].enabled);
    }

    #[test]
    fn test_failed_mutation_leaves_revision_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(tmp.path().join("registry.json"));
        store
            .commit(|doc| {
                doc.upsert(record(Namespace::Global, "echo"));
                Ok(())
            })
            .unwrap();

        let result: Result<()> = store.commit(|_| Err(Error::message("boom")));
        assert!(result.is_err());
        assert_eq!(store.revision().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut doc = RegistryDocument::default();
        doc.upsert(record(Namespace::Global, "a"));
        doc.upsert(record(Namespace::Global, "b"));

        let mut replacement = record(Namespace::Global, "a");
        replacement.enabled = false;
        doc.upsert(replacement);

        assert_eq!(doc.records.len(), 2);
        assert_eq!(doc.records[0].name, "a");
        assert!(!doc.records[0].enabled);
    }

    #[test]
    fn test_same_name_coexists_across_namespaces() {
        let mut doc = RegistryDocument::default();
        doc.upsert(record(Namespace::Global, "foo"));
        doc.upsert(record(Namespace::Agent("a".into()), "foo"));
        assert_eq!(doc.records.len(), 2);
        assert!(doc.get(&Namespace::Global, "foo").is_some());
        assert!(doc.get(&Namespace::Agent("a".into()), "foo").is_some());
    }

    #[test]
    fn test_remove_by_key() {
        let mut doc = RegistryDocument::default();
        doc.upsert(record(Namespace::Global, "foo"));
        assert!(doc.remove(&Namespace::Global, "foo"));
        assert!(!doc.remove(&Namespace::Global, "foo"));
        assert!(doc.records.is_empty());
    }
}
