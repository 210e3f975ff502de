//! Core identifier types for the alarm engine.
//!
//! These types provide type-safe identifiers for alarms, occurrences,
//! and platform wake registrations.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an alarm.
///
/// Assigned by the caller at creation time and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmId(String);

/// Unique identifier for one concrete scheduled instance of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccurrenceId(Uuid);

/// Opaque token representing a pending OS-level wake registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl AlarmId {
    /// Create a new AlarmId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlarmId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AlarmId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl OccurrenceId {
    /// Generate a new random OccurrenceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an OccurrenceId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OccurrenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationId {
    /// Generate a new random RegistrationId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RegistrationId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
