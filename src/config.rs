//! Application configuration: copy pairs, account credentials, sync settings.
//!
//! Loaded once at startup from a JSON file. A missing file produces a
//! placeholder template next to the requested path and an explicit error so
//! the operator fills it in before restarting.

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One trading account endpoint plus credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub login: u64,
    pub server: String,

    /// Inline password. Prefer `password_env` outside of local testing.
    #[serde(default)]
    pub password: String,

    /// Name of an environment variable holding the password. Takes
    /// precedence over `password` when set and present in the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl AccountConfig {
    /// Stable pool/logging key for this account.
    pub fn key(&self) -> String {
        format!("{}@{}", self.login, self.server)
    }

    /// Resolve the effective password, honoring `password_env`.
    pub fn resolve_password(&self) -> String {
        if let Some(var) = &self.password_env {
            if let Ok(value) = std::env::var(var) {
                return value;
            }
        }
        self.password.clone()
    }
}

/// Per-pair sync settings. Immutable for the lifetime of a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairSettings {
    /// Target volume = source volume * multiplier, rounded to 2 decimals.
    pub volume_multiplier: Decimal,

    /// Allow-list of symbols to copy; empty means all symbols.
    pub symbol_filter: Vec<String>,

    /// Maximum accepted slippage for market orders, in points.
    pub max_deviation: u32,

    /// Cadence of the reconciliation cycle.
    pub sync_interval_ms: u64,

    /// Copy positions that have neither stop-loss nor take-profit set.
    pub allow_positions_without_stop_levels: bool,

    /// Propagate source stop-level changes to the target.
    pub sync_stop_levels: bool,

    /// Attempts per gateway mutation before deferring to the next cycle.
    pub order_retry_attempts: u32,

    /// Delay between retry attempts.
    pub order_retry_delay_ms: u64,

    /// How long to poll for the target ticket after an accepted open.
    pub confirm_timeout_ms: u64,

    /// Poll spacing inside the confirmation window.
    pub confirm_poll_ms: u64,

    /// Sleep after an unexpected cycle failure before retrying.
    pub error_backoff_ms: u64,
}

impl Default for PairSettings {
    fn default() -> Self {
        Self {
            volume_multiplier: dec!(1.0),
            symbol_filter: Vec::new(),
            max_deviation: 5,
            sync_interval_ms: 300,
            allow_positions_without_stop_levels: true,
            sync_stop_levels: true,
            order_retry_attempts: 3,
            order_retry_delay_ms: 500,
            confirm_timeout_ms: 5000,
            confirm_poll_ms: 200,
            error_backoff_ms: 5000,
        }
    }
}

/// One source -> target copy relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPairConfig {
    /// Identifier used in logs and copy tags. Must be unique.
    pub id: String,

    pub source: AccountConfig,
    pub target: AccountConfig,

    #[serde(default)]
    pub settings: PairSettings,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub copy_pairs: Vec<CopyPairConfig>,
}

impl AppConfig {
    /// Load and validate configuration from `path`.
    ///
    /// When the file is missing, a placeholder template is written to
    /// `<path>.template` and [`ConfigError::Missing`] is returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            let template = Self::template_path(path);
            Self::template().write(&template)?;
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
                template,
            });
        }

        let raw = fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: AppConfig = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self).map_err(ConfigError::Parse)?;
        fs::write(path, raw).map_err(ConfigError::Write)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.copy_pairs.is_empty() {
            return Err(ConfigError::Invalid {
                field: "copy_pairs",
                reason: "at least one copy pair is required".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for pair in &self.copy_pairs {
            if pair.id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "copy_pairs.id",
                    reason: "pair id must not be empty".to_string(),
                });
            }
            if !seen.insert(pair.id.clone()) {
                return Err(ConfigError::Invalid {
                    field: "copy_pairs.id",
                    reason: format!("duplicate pair id '{}'", pair.id),
                });
            }
            if pair.settings.volume_multiplier <= Decimal::ZERO {
                return Err(ConfigError::Invalid {
                    field: "settings.volume_multiplier",
                    reason: format!("must be > 0, got {}", pair.settings.volume_multiplier),
                });
            }
            if pair.settings.sync_interval_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "settings.sync_interval_ms",
                    reason: "must be > 0".to_string(),
                });
            }
            if pair.settings.order_retry_attempts == 0 {
                return Err(ConfigError::Invalid {
                    field: "settings.order_retry_attempts",
                    reason: "must be >= 1".to_string(),
                });
            }
            if pair.settings.confirm_poll_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "settings.confirm_poll_ms",
                    reason: "must be > 0".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Placeholder configuration written when no config file exists.
    pub fn template() -> Self {
        Self {
            copy_pairs: vec![CopyPairConfig {
                id: "pair-1".to_string(),
                source: AccountConfig {
                    login: 10000001,
                    server: "Broker-Demo".to_string(),
                    password: "CHANGE_ME".to_string(),
                    password_env: None,
                },
                target: AccountConfig {
                    login: 10000002,
                    server: "Broker-Demo".to_string(),
                    password: String::new(),
                    password_env: Some("MULTICOPY_TARGET_PASSWORD".to_string()),
                },
                settings: PairSettings::default(),
            }],
        }
    }

    fn template_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        name.push_str(".template");
        path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn valid_config() -> AppConfig {
        AppConfig::template()
    }

    #[test]
    fn test_template_validates() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_multiplier() {
        let mut config = valid_config();
        config.copy_pairs[0].settings.volume_multiplier = Decimal::ZERO;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "settings.volume_multiplier"));
    }

    #[test]
    fn test_rejects_duplicate_pair_ids() {
        let mut config = valid_config();
        let dup = config.copy_pairs[0].clone();
        config.copy_pairs.push(dup);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let err = AppConfig::load(&path).unwrap_err();
        match err {
            ConfigError::Missing { template, .. } => {
                assert!(template.exists());
                let raw = fs::read_to_string(template).unwrap();
                assert!(raw.contains("copy_pairs"));
            }
            other => panic!("expected Missing, got {other}"),
        }
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        valid_config().write(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.copy_pairs.len(), 1);
        assert_eq!(loaded.copy_pairs[0].id, "pair-1");
    }

    #[test]
    fn test_password_env_override() {
        let account = AccountConfig {
            login: 1,
            server: "s".to_string(),
            password: "inline".to_string(),
            password_env: Some("MULTICOPY_TEST_PASSWORD".to_string()),
        };

        std::env::set_var("MULTICOPY_TEST_PASSWORD", "from-env");
        assert_eq!(account.resolve_password(), "from-env");
        std::env::remove_var("MULTICOPY_TEST_PASSWORD");
        assert_eq!(account.resolve_password(), "inline");
    }
}
