//! TOML-based configuration.
//!
//! Holds the tunables of both subsystems:
//! - Escalation timeouts and the response countdown
//! - Reminder tick interval, pending cap, countdown and catalog
//! - Log filter
//!
//! Configuration is stored at `~/.config/aurocare/config.toml` unless a
//! path is given explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;

use super::data_dir;
use crate::error::ConfigError;
use crate::escalation::EscalationConfig;
use crate::reminder::{default_catalog, ReminderConfig, ReminderDefinition, MAX_INTERVAL_SECS};

/// Escalation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSettings {
    #[serde(default = "default_tier_timeout_secs")]
    pub tier_timeout_secs: u64,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,
    #[serde(default = "default_response_countdown_secs")]
    pub response_countdown_secs: u64,
}

/// Reminder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_reminder_countdown_secs")]
    pub countdown_secs: u64,
    /// Offset from UTC that daily due times are read in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_catalog")]
    pub catalog: Vec<ReminderDefinition>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing` filter directive, overridden by RUST_LOG.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub escalation: EscalationSettings,
    #[serde(default)]
    pub reminders: ReminderSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

// Default functions
fn default_tier_timeout_secs() -> u64 {
    30
}
fn default_dispatch_timeout_secs() -> u64 {
    10
}
fn default_failure_backoff_secs() -> u64 {
    2
}
fn default_response_countdown_secs() -> u64 {
    30
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_max_pending() -> usize {
    4
}
fn default_reminder_countdown_secs() -> u64 {
    300
}
fn default_history_limit() -> usize {
    64
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            tier_timeout_secs: default_tier_timeout_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
            response_countdown_secs: default_response_countdown_secs(),
        }
    }
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_pending: default_max_pending(),
            countdown_secs: default_reminder_countdown_secs(),
            utc_offset_minutes: 0,
            history_limit: default_history_limit(),
            catalog: default_catalog(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::InvalidValue {
            key: key.to_string(),
            message: "unknown config key".into(),
        };
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Number(_) => value
                        .parse::<i64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// `config.toml` in the data directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load and validate a config file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        let cfg: Config = toml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
    }

    /// Persist to disk, creating the parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key; the result must still validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or fails validation.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".into(),
                });
            }
            Ok(())
        }

        fn at_most_a_year(key: &str, value: u64) -> Result<(), ConfigError> {
            if value > MAX_INTERVAL_SECS {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be at most {MAX_INTERVAL_SECS}"),
                });
            }
            Ok(())
        }

        positive("escalation.tier_timeout_secs", self.escalation.tier_timeout_secs)?;
        positive("escalation.dispatch_timeout_secs", self.escalation.dispatch_timeout_secs)?;
        positive("escalation.response_countdown_secs", self.escalation.response_countdown_secs)?;
        positive("reminders.tick_interval_ms", self.reminders.tick_interval_ms)?;
        positive("reminders.max_pending", self.reminders.max_pending as u64)?;
        positive("reminders.countdown_secs", self.reminders.countdown_secs)?;
        positive("reminders.history_limit", self.reminders.history_limit as u64)?;
        at_most_a_year("escalation.tier_timeout_secs", self.escalation.tier_timeout_secs)?;
        at_most_a_year("escalation.failure_backoff_secs", self.escalation.failure_backoff_secs)?;
        at_most_a_year("escalation.response_countdown_secs", self.escalation.response_countdown_secs)?;
        at_most_a_year("reminders.countdown_secs", self.reminders.countdown_secs)?;
        if self.escalation.dispatch_timeout_secs >= self.escalation.tier_timeout_secs {
            return Err(ConfigError::InvalidValue {
                key: "escalation.dispatch_timeout_secs".into(),
                message: format!(
                    "must be shorter than escalation.tier_timeout_secs ({})",
                    self.escalation.tier_timeout_secs
                ),
            });
        }
        self.utc_offset()?;

        let mut keys = HashSet::new();
        for def in &self.reminders.catalog {
            def.validate().map_err(|e| ConfigError::InvalidValue {
                key: "reminders.catalog".into(),
                message: e.to_string(),
            })?;
            if !keys.insert(def.key.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "reminders.catalog".into(),
                    message: format!("duplicate reminder key '{}'", def.key),
                });
            }
        }
        Ok(())
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            tier_timeout: Duration::from_secs(self.escalation.tier_timeout_secs),
            dispatch_timeout: Duration::from_secs(self.escalation.dispatch_timeout_secs),
            failure_backoff: Duration::from_secs(self.escalation.failure_backoff_secs),
            response_countdown: Duration::from_secs(self.escalation.response_countdown_secs),
        }
    }

    pub fn reminder_config(&self) -> Result<ReminderConfig, ConfigError> {
        Ok(ReminderConfig {
            tick_interval: Duration::from_millis(self.reminders.tick_interval_ms),
            max_pending: self.reminders.max_pending,
            countdown: Duration::from_secs(self.reminders.countdown_secs),
            utc_offset: self.utc_offset()?,
            history_limit: self.reminders.history_limit,
        })
    }

    fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.reminders.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "reminders.utc_offset_minutes".into(),
                message: format!("{} is out of range", self.reminders.utc_offset_minutes),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.reminders.catalog.len(), 4);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[escalation]\ntier_timeout_secs = 15\n").unwrap();
        assert_eq!(cfg.escalation.tier_timeout_secs, 15);
        assert_eq!(cfg.escalation.dispatch_timeout_secs, 10);
        assert_eq!(cfg.reminders.max_pending, 4);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("escalation.tier_timeout_secs").as_deref(), Some("30"));
        assert_eq!(cfg.get("logging.filter").as_deref(), Some("info"));
        assert!(cfg.get("escalation.missing_key").is_none());
    }

    #[test]
    fn set_updates_and_validates() {
        let mut cfg = Config::default();
        cfg.set("reminders.max_pending", "2").unwrap();
        assert_eq!(cfg.reminders.max_pending, 2);

        let err = cfg.set("reminders.max_pending", "0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(cfg.reminders.max_pending, 2);

        assert!(cfg.set("reminders.nonexistent", "1").is_err());
        assert!(cfg.set("escalation.tier_timeout_secs", "soon").is_err());
    }

    #[test]
    fn validate_rejects_bad_offsets_and_catalog() {
        let mut cfg = Config::default();
        cfg.reminders.utc_offset_minutes = 24 * 60;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        let dup = cfg.reminders.catalog[0].clone();
        cfg.reminders.catalog.push(dup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dispatch_timeout_must_fit_inside_a_tier() {
        let mut cfg = Config::default();
        assert!(cfg.set("escalation.tier_timeout_secs", "5").is_err());
        assert_eq!(cfg.escalation.tier_timeout_secs, 30);

        let err = cfg.set("escalation.dispatch_timeout_secs", "30").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "escalation.dispatch_timeout_secs"));
        cfg.set("escalation.dispatch_timeout_secs", "29").unwrap();
    }

    #[test]
    fn validate_rejects_oversized_reminder_windows() {
        let mut cfg = Config::default();
        let huge = cfg.reminders.catalog[0]
            .clone()
            .with_dedup_window(10_000_000_000_000_000);
        cfg.reminders.catalog[0] = huge;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "reminders.catalog"
        ));

        let mut cfg = Config::default();
        assert!(cfg.set("reminders.countdown_secs", "100000000000").is_err());
    }

    #[test]
    fn history_limit_must_keep_closed_reminders() {
        let mut cfg = Config::default();
        assert!(cfg.set("reminders.history_limit", "0").is_err());
        assert_eq!(cfg.reminders.history_limit, 64);
    }

    #[test]
    fn converts_to_runtime_configs() {
        let mut cfg = Config::default();
        cfg.reminders.utc_offset_minutes = -300;
        let escalation = cfg.escalation_config();
        assert_eq!(escalation.tier_timeout, Duration::from_secs(30));
        assert_eq!(escalation.failure_backoff, Duration::from_secs(2));

        let reminders = cfg.reminder_config().unwrap();
        assert_eq!(reminders.tick_interval, Duration::from_secs(1));
        assert_eq!(reminders.utc_offset.local_minus_utc(), -300 * 60);
    }

    #[test]
    fn save_then_load_from_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.logging.filter = "aurocare_core=debug".into();
        cfg.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_loads_defaults_and_bad_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(Config::load(&missing).unwrap(), Config::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[escalation\n").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::ParseFailed(_))));
        assert_eq!(Config::load_or_default(&broken), Config::default());
    }
}
