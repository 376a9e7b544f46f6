//! Configuration loading and data-directory resolution.
//!
//! Config files: `skskills.toml`, `skskills.yaml`, or `skskills.json`,
//! searched in `./` then `~/.config/skskills/`. The skill home (registry
//! root) honours the `SKSKILLS_HOME` environment variable.

pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{SkskillsConfig, SupervisorConfig},
};
