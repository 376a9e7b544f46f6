//! Namespace scoping and the two-tier effective-skill lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{InstalledSkillRecord, RegistryDocument};

/// Installation scope: the shared global scope or a named agent.
///
/// Serialized as a plain string (`"global"` or the agent name), matching the
/// registry document's on-disk shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Namespace {
    Global,
    Agent(String),
}

impl Namespace {
    /// Parse an optional CLI `--agent` value.
    pub fn from_agent(agent: Option<&str>) -> Self {
        match agent {
            None | Some("global") => Self::Global,
            Some(name) => Self::Agent(name.to_string()),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        if s == "global" {
            Self::Global
        } else {
            Self::Agent(s)
        }
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Agent(name) => f.write_str(name),
        }
    }
}

/// Resolve the effective skill set a run session for `namespace` activates.
///
/// Two-tier lookup: agent-scoped records first, then global records whose
/// names are not shadowed. Shadowing is name-level and never merges fields —
/// an agent-scoped record masks the global one even when disabled. Only
/// enabled records make it into the result.
pub fn effective_skills<'a>(
    doc: &'a RegistryDocument,
    namespace: &Namespace,
) -> Vec<&'a InstalledSkillRecord> {
    let mut result: Vec<&InstalledSkillRecord> = Vec::new();

    if let Namespace::Agent(_) = namespace {
        for record in doc.records_in(namespace) {
            if record.enabled {
                result.push(record);
            }
        }
    }

    let shadowed: Vec<&str> = if namespace.is_global() {
        Vec::new()
    } else {
        doc.records_in(namespace).map(|r| r.name.as_str()).collect()
    };

    for record in doc.records_in(&Namespace::Global) {
        if record.enabled && !shadowed.contains(&record.name.as_str()) {
            result.push(record);
        }
    }

    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}
