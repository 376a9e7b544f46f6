//! Skill registry: manifest validation, on-disk store, durable index,
//! namespace resolution, and lifecycle transactions.
//!
//! A skill is a directory containing a `skill.yaml` manifest and the files
//! backing its declared primitives. Installed skills live under the skskills
//! home, one directory per (namespace, name), indexed by a single versioned
//! registry document.

pub mod document;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod resolve;
pub mod store;

pub use {
    document::{InstallSource, InstalledSkillRecord, LinkMode, RegistryDocument, RegistryStore},
    error::{Error, Result},
    lifecycle::{LifecycleError, LifecycleManager, ProcessQuiescer},
    manifest::{Primitive, SkillManifest, ValidationError, MANIFEST_FILENAME},
    resolve::{effective_skills, Namespace},
    store::SkillStore,
};
