use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MIN_REASON_LENGTH: usize = 5;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation.
///
/// Loaded from `config/default` (optional file) layered with
/// `FULFILLMENT_`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Budget for a single notification dispatch; elapsed maps to
    /// `NotificationFailed`.
    #[serde(default = "default_notification_timeout_ms")]
    #[validate(range(min = 1))]
    pub notification_timeout_ms: u64,

    /// Budget for an inventory ledger commit; elapsed maps to `LedgerFailed`.
    #[serde(default = "default_ledger_timeout_ms")]
    #[validate(range(min = 1))]
    pub ledger_timeout_ms: u64,

    /// How long a transition waits on a contended per-entity lock before
    /// failing with `ConcurrentModification`.
    #[serde(default = "default_lock_timeout_ms")]
    #[validate(range(min = 1))]
    pub lock_timeout_ms: u64,

    /// Minimum accepted length for a payment rejection reason.
    #[serde(default = "default_min_reason_length")]
    #[validate(range(min = 1))]
    pub min_reason_length: usize,

    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deployment environment name.
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_notification_timeout_ms() -> u64 {
    DEFAULT_NOTIFICATION_TIMEOUT_MS
}
fn default_ledger_timeout_ms() -> u64 {
    DEFAULT_LEDGER_TIMEOUT_MS
}
fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}
fn default_min_reason_length() -> usize {
    DEFAULT_MIN_REASON_LENGTH
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            notification_timeout_ms: DEFAULT_NOTIFICATION_TIMEOUT_MS,
            ledger_timeout_ms: DEFAULT_LEDGER_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            min_reason_length: DEFAULT_MIN_REASON_LENGTH,
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the config directory and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg: AppConfig = Config::builder()
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(Environment::with_prefix("FULFILLMENT").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(
            environment = %cfg.environment,
            notification_timeout_ms = cfg.notification_timeout_ms,
            ledger_timeout_ms = cfg.ledger_timeout_ms,
            "configuration loaded"
        );
        Ok(cfg)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.notification_timeout(), Duration::from_millis(5_000));
        assert_eq!(cfg.min_reason_length, 5);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let cfg = AppConfig {
            notification_timeout_ms: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
