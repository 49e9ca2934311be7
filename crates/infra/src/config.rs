//! Engine configuration.
//!
//! Values come from the process environment (`from_env`) or are set directly
//! through the builder-style setters.

use std::time::Duration;

use thiserror::Error;

pub const SCHEDULER_INTERVAL_ENV: &str = "ASSETFLOW_SCHEDULER_INTERVAL_SECS";
pub const DISABLE_SCHEDULER_ENV: &str = "ASSETFLOW_DISABLE_SCHEDULER";
pub const LOW_STOCK_THRESHOLD_ENV: &str = "ASSETFLOW_LOW_STOCK_THRESHOLD";
pub const SERIAL_UNIT_PREFIX_ENV: &str = "ASSETFLOW_SERIAL_UNIT_PREFIX";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cadence of the venue-loan scheduler.
    pub scheduler_interval: Duration,
    pub scheduler_enabled: bool,
    /// Stock levels strictly below this count as low.
    pub low_stock_threshold: u64,
    /// Prefix of generated serial-unit codes, applied at every receipt.
    pub serial_unit_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(60),
            scheduler_enabled: true,
            low_stock_threshold: 10,
            serial_unit_prefix: "SU".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(SCHEDULER_INTERVAL_ENV) {
            let secs = parse_u64(SCHEDULER_INTERVAL_ENV, &raw)?;
            if secs == 0 {
                return Err(invalid(SCHEDULER_INTERVAL_ENV, &raw));
            }
            cfg.scheduler_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(DISABLE_SCHEDULER_ENV) {
            cfg.scheduler_enabled = match raw.trim() {
                "" | "0" | "false" => true,
                "1" | "true" => false,
                _ => return Err(invalid(DISABLE_SCHEDULER_ENV, &raw)),
            };
        }

        if let Some(raw) = lookup(LOW_STOCK_THRESHOLD_ENV) {
            cfg.low_stock_threshold = parse_u64(LOW_STOCK_THRESHOLD_ENV, &raw)?;
        }

        if let Some(raw) = lookup(SERIAL_UNIT_PREFIX_ENV) {
            let prefix = raw.trim();
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid(SERIAL_UNIT_PREFIX_ENV, &raw));
            }
            cfg.serial_unit_prefix = prefix.to_string();
        }

        Ok(cfg)
    }

    pub fn with_scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = interval;
        self
    }

    pub fn with_scheduler_enabled(mut self, enabled: bool) -> Self {
        self.scheduler_enabled = enabled;
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: u64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn with_serial_unit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.serial_unit_prefix = prefix.into();
        self
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}
