//! Autotrust configuration.
//!
//! Hold-down durations are operator policy, not protocol constants: RFC 5011
//! suggests 30 days for both add and remove hold-downs, which are the
//! defaults here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Seconds in a day.
const DAY: u64 = 24 * 3600;

/// Configuration for trust anchor maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutotrustConfig {
    /// Trust anchor files to load and keep up to date.
    #[serde(default)]
    pub anchor_files: Vec<PathBuf>,

    /// Hold-down and forget policy.
    #[serde(default)]
    pub holddown: HolddownPolicy,

    /// How long the probe loop sleeps when no trust point is scheduled.
    #[serde(default = "default_probe_wait")]
    pub default_probe_wait_secs: u64,
}

/// Timing policy for key state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolddownPolicy {
    /// Time a new key must stay published before it is trusted.
    #[serde(default = "default_add_holddown")]
    pub add_holddown_secs: u64,

    /// Time a revoked key is kept before it is removed.
    #[serde(default = "default_del_holddown")]
    pub del_holddown_secs: u64,

    /// Time a missing key is kept before it is forgotten; 0 keeps it forever.
    #[serde(default = "default_keep_missing")]
    pub keep_missing_secs: u64,

    /// Probes that must have seen a pending key before it is trusted.
    #[serde(default = "default_min_pending_count")]
    pub min_pending_count: u8,

    /// Lift the one-hour floors on probe timing. For test deployments.
    #[serde(default)]
    pub permit_small_holddown: bool,
}

impl Default for AutotrustConfig {
    fn default() -> Self {
        Self {
            anchor_files: Vec::new(),
            holddown: HolddownPolicy::default(),
            default_probe_wait_secs: default_probe_wait(),
        }
    }
}

impl Default for HolddownPolicy {
    fn default() -> Self {
        Self {
            add_holddown_secs: default_add_holddown(),
            del_holddown_secs: default_del_holddown(),
            keep_missing_secs: default_keep_missing(),
            min_pending_count: default_min_pending_count(),
            permit_small_holddown: false,
        }
    }
}

impl AutotrustConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| crate::AutotrustError::io(path, e))?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::AutotrustError::Config(e.to_string()))
    }
}

impl HolddownPolicy {
    /// Smallest probe wait the scheduler will use.
    #[must_use]
    pub const fn min_probe_wait(&self) -> u64 {
        if self.permit_small_holddown {
            1
        } else {
            3600
        }
    }
}

// Default value functions for serde.
const fn default_add_holddown() -> u64 {
    30 * DAY
}

const fn default_del_holddown() -> u64 {
    30 * DAY
}

const fn default_keep_missing() -> u64 {
    366 * DAY
}

const fn default_min_pending_count() -> u8 {
    2
}

const fn default_probe_wait() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AutotrustConfig::default();
        assert!(config.anchor_files.is_empty());
        assert_eq!(config.holddown.add_holddown_secs, 30 * DAY);
        assert_eq!(config.holddown.del_holddown_secs, 30 * DAY);
        assert_eq!(config.holddown.keep_missing_secs, 366 * DAY);
        assert_eq!(config.holddown.min_pending_count, 2);
        assert!(!config.holddown.permit_small_holddown);
        assert_eq!(config.default_probe_wait_secs, 3600);
    }

    #[test]
    fn test_partial_toml() {
        let config = AutotrustConfig::from_toml(
            r#"
            anchor_files = ["/var/lib/i1/root.key"]

            [holddown]
            add_holddown_secs = 60
            permit_small_holddown = true
            "#,
        )
        .unwrap();
        assert_eq!(config.anchor_files, vec![PathBuf::from("/var/lib/i1/root.key")]);
        assert_eq!(config.holddown.add_holddown_secs, 60);
        assert_eq!(config.holddown.del_holddown_secs, 30 * DAY);
        assert!(config.holddown.permit_small_holddown);
        assert_eq!(config.holddown.min_probe_wait(), 1);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AutotrustConfig::from_toml("anchor_files = 3").unwrap_err();
        assert!(matches!(err, crate::AutotrustError::Config(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config =
            AutotrustConfig::load(std::path::Path::new("/nonexistent/i1/autotrust.toml")).unwrap();
        assert_eq!(config.holddown, HolddownPolicy::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = AutotrustConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AutotrustConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.holddown, config.holddown);
    }
}
