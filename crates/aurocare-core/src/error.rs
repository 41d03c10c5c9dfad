//! Core error types for aurocare-core.
//!
//! Only validation and lookup problems surface as errors. Gateway failures
//! are recovered by escalating to the next tier, transitions on terminal
//! alerts are idempotent no-ops, and delayed reminder ticks are logged.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for aurocare-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Alert state machine errors
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    /// Reminder scheduler errors
    #[error("Reminder error: {0}")]
    Reminder(#[from] ReminderError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by alert entry points.
#[derive(Error, Debug)]
pub enum AlertError {
    /// Activation or acknowledgment input was rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No alert with this id exists in the current session
    #[error("Alert not found: {0}")]
    NotFound(String),

    /// Acknowledgment from a contact that was never reached
    #[error("Contact '{contact_id}' has no delivered attempt on alert {alert_id}")]
    NotDispatched { alert_id: String, contact_id: String },
}

/// Errors returned by reminder entry points.
#[derive(Error, Debug)]
pub enum ReminderError {
    /// No live or recent reminder with this id
    #[error("Reminder not found: {0}")]
    NotFound(String),
}

/// A single dispatch to a contact went wrong.
///
/// Gateways report these through [`crate::escalation::DispatchOutcome`];
/// the scheduler records them as `failed` attempts and keeps escalating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The channel refused or could not carry the message
    #[error("Delivery to {contact} failed: {reason}")]
    DeliveryFailed { contact: String, reason: String },

    /// No answer from the channel within the dispatch timeout
    #[error("Delivery to {contact} timed out after {timeout_secs}s")]
    TimedOut { contact: String, timeout_secs: u64 },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Home or config directory could not be resolved
    #[error("Configuration directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field missing or blank
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    pub(crate) fn require(field: &str, value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            Err(ValidationError::MissingField(field.to_string()))
        } else {
            Ok(())
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_rejects_blank() {
        assert_eq!(
            ValidationError::require("location", "   "),
            Err(ValidationError::MissingField("location".into()))
        );
        assert!(ValidationError::require("location", "Kitchen").is_ok());
    }

    #[test]
    fn alert_error_wraps_validation() {
        let err: CoreError = AlertError::from(ValidationError::MissingField("patient_id".into())).into();
        assert_eq!(
            err.to_string(),
            "Alert error: Missing required field 'patient_id'"
        );
    }
}
