//! Config schema with serde defaults.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Top-level skskills configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkskillsConfig {
    /// Override for the skill home directory (registry root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Tunables for the process supervisor.
///
/// The restart and handshake constants are deliberately configuration, not
/// hard-coded: different skill sets tolerate very different startup times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Maximum restarts per skill within one run session.
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    /// First backoff delay after an unexpected exit; doubles per attempt.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    /// How long a skill may take to complete its transport handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Grace period between cooperative shutdown and a forced kill.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_restart_limit() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_limit: default_restart_limit(),
            backoff_initial_ms: default_backoff_initial_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Backoff delay before restart attempt `n` (1-based): initial * 2^(n-1).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_initial_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_defaults() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.restart_limit, 3);
        assert_eq!(cfg.backoff_initial(), Duration::from_secs(1));
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: SkskillsConfig =
            toml::from_str("[supervisor]\nrestart_limit = 5\n").unwrap();
        assert_eq!(cfg.supervisor.restart_limit, 5);
        assert_eq!(cfg.supervisor.handshake_timeout_ms, 5_000);
    }
}
