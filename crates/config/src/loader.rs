use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::SkskillsConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "skskills.toml",
    "skskills.yaml",
    "skskills.yml",
    "skskills.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SkskillsConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./skskills.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/skskills/skskills.{toml,yaml,yml,json}` (user-global)
///
/// Returns `SkskillsConfig::default()` if no config file is found.
pub fn discover_and_load() -> SkskillsConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SkskillsConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/skskills/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "skskills") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/skskills/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skskills").map(|d| d.config_dir().to_path_buf())
}

/// Returns the skill home directory (registry root).
///
/// Resolution order: `SKSKILLS_HOME` env var, then `home` from the loaded
/// config, then the platform data dir (`~/.local/share/skskills` on Linux).
pub fn data_dir(config: &SkskillsConfig) -> PathBuf {
    if let Ok(home) = std::env::var("SKSKILLS_HOME")
        && !home.is_empty()
    {
        return PathBuf::from(home);
    }
    if let Some(home) = &config.home {
        return home.clone();
    }
    directories::ProjectDirs::from("", "", "skskills")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".skskills"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SkskillsConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
