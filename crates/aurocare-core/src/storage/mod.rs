mod config;

pub use config::{Config, EscalationSettings, LoggingSettings, ReminderSettings};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/aurocare[-dev]/` based on AUROCARE_ENV.
///
/// Set AUROCARE_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("AUROCARE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("aurocare-dev")
    } else {
        base_dir.join("aurocare")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
