//! Skill manifest: the declarative `skill.yaml` contract every skill satisfies.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Manifest file name at the root of every skill directory.
pub const MANIFEST_FILENAME: &str = "skill.yaml";

/// The three primitive surfaces a skill can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// Readable context served as protocol resources.
    Knowledge,
    /// Invokable actions exposed as protocol tools.
    Capability,
    /// Scheduled or event-triggered automation.
    Flow,
}

/// A dependency on another skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDependency {
    pub name: String,
    #[serde(default = "any_version")]
    pub version: semver::VersionReq,
}

fn any_version() -> semver::VersionReq {
    semver::VersionReq::STAR
}

/// A validated skill manifest. Immutable once installed; `update` swaps in a
/// whole new snapshot rather than mutating fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub primitives: Vec<Primitive>,
    /// Entry command line. The program path is relative to the skill
    /// directory and must not escape it.
    pub entry: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<SkillDependency>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Why a raw manifest was rejected. Every variant is fatal to the
/// install/update that triggered validation; nothing is partially applied.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("manifest is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid skill name '{0}': must match [a-z0-9-]+")]
    InvalidName(String),
    #[error("invalid version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },
    #[error("unknown primitive '{0}': expected knowledge, capability, or flow")]
    UnknownPrimitive(String),
    #[error("entry '{0}' escapes the skill directory")]
    PathEscape(String),
}

/// Untyped mirror of the manifest, used to produce field-level errors
/// instead of opaque serde messages.
#[derive(Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    license: Option<String>,
    primitives: Option<Vec<String>>,
    entry: Option<String>,
    #[serde(default)]
    dependencies: Vec<SkillDependency>,
    #[serde(default)]
    requires_auth: bool,
    #[serde(default)]
    tags: Vec<String>,
}

impl SkillManifest {
    /// Parse and validate a raw `skill.yaml` document.
    ///
    /// Pure: no I/O, no partial application. All checks run against the
    /// parsed document; the first failure aborts the whole operation.
    pub fn validate(raw: &str) -> Result<Self, ValidationError> {
        let raw: RawManifest = serde_yaml::from_str(raw)?;

        let name = raw.name.ok_or(ValidationError::MissingField("name"))?;
        if !is_valid_name(&name) {
            return Err(ValidationError::InvalidName(name));
        }

        let version = raw.version.ok_or(ValidationError::MissingField("version"))?;
        let version = version
            .parse::<semver::Version>()
            .map_err(|source| ValidationError::InvalidVersion { version, source })?;

        let primitives = raw
            .primitives
            .ok_or(ValidationError::MissingField("primitives"))?;
        if primitives.is_empty() {
            return Err(ValidationError::MissingField("primitives"));
        }
        let primitives = primitives
            .into_iter()
            .map(|p| match p.as_str() {
                "knowledge" => Ok(Primitive::Knowledge),
                "capability" => Ok(Primitive::Capability),
                "flow" => Ok(Primitive::Flow),
                _ => Err(ValidationError::UnknownPrimitive(p)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = raw.entry.ok_or(ValidationError::MissingField("entry"))?;
        if entry.trim().is_empty() {
            return Err(ValidationError::MissingField("entry"));
        }
        validate_entry(&entry)?;

        Ok(Self {
            name,
            version,
            description: raw.description,
            author: raw.author,
            license: raw.license,
            primitives,
            entry,
            dependencies: raw.dependencies,
            requires_auth: raw.requires_auth,
            tags: raw.tags,
        })
    }

    /// Read and validate `skill.yaml` from a skill directory.
    pub fn load(skill_dir: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(skill_dir.join(MANIFEST_FILENAME))?;
        Ok(Self::validate(&raw)?)
    }

    /// Serialize back to YAML. Round-trips through [`SkillManifest::validate`].
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Split the entry line into (program, args).
    pub fn entry_command(&self) -> (String, Vec<String>) {
        let mut parts = self.entry.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// The entry program must stay inside the skill directory: relative, and no
/// parent/root components anywhere in the path.
fn validate_entry(entry: &str) -> Result<(), ValidationError> {
    let program = entry.split_whitespace().next().unwrap_or_default();
    let path = Path::new(program);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::PathEscape(entry.to_string()));
            },
        }
    }
    Ok(())
}
