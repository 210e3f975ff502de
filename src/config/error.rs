//! Configuration error types.

use thiserror::Error;

use crate::core::RepeatError;

/// Errors that can occur loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the YAML document.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An alarm definition is invalid.
    #[error("invalid alarm '{id}': {reason}")]
    InvalidAlarm { id: String, reason: String },

    /// Two alarms share the same id.
    #[error("duplicate alarm id: {0}")]
    DuplicateAlarmId(String),

    /// A repeat rule could not be built.
    #[error(transparent)]
    Repeat(#[from] RepeatError),
}

impl ConfigError {
    /// Convenience constructor for per-alarm validation failures.
    pub fn invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidAlarm {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
