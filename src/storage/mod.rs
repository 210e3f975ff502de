//! Storage abstraction for persisting alarms and their occurrence state.
//!
//! This module provides a trait-based storage abstraction with pluggable
//! backends (in-memory, SQLite). Every alarm row carries its live occurrence
//! state and `fire_at`, so a cold start can rebuild the full schedule with
//! no in-memory cache assumed valid. All occurrence-state transitions go
//! through the store's serialized compare-and-set path, which is what makes
//! duplicate trigger callbacks safe.

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

use crate::core::backoff::WriteRetry;
use crate::core::types::{AlarmId, OccurrenceId, RegistrationId};
use crate::core::Alarm;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested alarm was not found.
    #[error("alarm not found: {0}")]
    NotFound(String),

    /// An alarm with this id already exists.
    #[error("duplicate alarm id: {0}")]
    DuplicateId(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store failed to complete a write or read.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Persistence(_))
    }
}

/// State of an alarm's live occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceState {
    /// Armed and waiting for its fire time.
    Scheduled,
    /// The wake callback fired; delivery has not started yet.
    Triggered,
    /// The alert is actively rendering.
    Delivering,
    /// The user (or the safety cutoff) acknowledged the delivery.
    Acknowledged,
    /// The user snoozed the delivery.
    Snoozed,
}

impl OccurrenceState {
    /// Whether the occurrence is between trigger and acknowledgment.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, OccurrenceState::Triggered | OccurrenceState::Delivering)
    }
}

/// The live scheduled instance of an alarm, persisted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    /// Identifier of this occurrence.
    pub occurrence_id: OccurrenceId,
    /// Current lifecycle state.
    pub state: OccurrenceState,
    /// The concrete instant this occurrence fires.
    pub fire_at: DateTime<Utc>,
    /// Snoozes consumed so far for this alarm cycle.
    pub snooze_count: u32,
    /// Pending OS wake registration, if one exists.
    pub registration: Option<RegistrationId>,
}

impl OccurrenceRecord {
    /// Create a fresh scheduled occurrence with no registration.
    pub fn scheduled(fire_at: DateTime<Utc>) -> Self {
        Self {
            occurrence_id: OccurrenceId::new(),
            state: OccurrenceState::Scheduled,
            fire_at,
            snooze_count: 0,
            registration: None,
        }
    }

    /// Create the transient occurrence produced by a snooze.
    pub fn snoozed(fire_at: DateTime<Utc>, snooze_count: u32) -> Self {
        Self {
            occurrence_id: OccurrenceId::new(),
            state: OccurrenceState::Scheduled,
            fire_at,
            snooze_count,
            registration: None,
        }
    }

    /// Attach a wake registration.
    pub fn with_registration(mut self, registration: RegistrationId) -> Self {
        self.registration = Some(registration);
        self
    }
}

/// An alarm together with its live occurrence, as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAlarm {
    /// The durable alarm definition.
    pub alarm: Alarm,
    /// The live occurrence, absent when the alarm is disabled or retired.
    pub occurrence: Option<OccurrenceRecord>,
}

impl StoredAlarm {
    /// Wrap an alarm with no occurrence.
    pub fn new(alarm: Alarm) -> Self {
        Self {
            alarm,
            occurrence: None,
        }
    }
}

/// Storage trait for persisting engine state.
///
/// All operations are durable before returning success. Writers to the same
/// alarm are serialized by the backend; last-writer-wins at the granularity
/// of a single call.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Save a new alarm definition. Fails with `DuplicateId` if it exists.
    async fn create(&self, alarm: Alarm) -> Result<(), StoreError>;

    /// Replace an alarm definition, leaving its occurrence untouched.
    /// Fails with `NotFound` on an unknown id.
    async fn update(&self, alarm: Alarm) -> Result<(), StoreError>;

    /// Delete an alarm and its occurrence. Fails with `NotFound` on an
    /// unknown id.
    async fn delete(&self, id: &AlarmId) -> Result<(), StoreError>;

    /// Get an alarm by id.
    async fn get(&self, id: &AlarmId) -> Result<StoredAlarm, StoreError>;

    /// List all alarms in ascending id order.
    async fn list(&self) -> Result<Vec<StoredAlarm>, StoreError>;

    /// Replace the live occurrence of an alarm (`None` clears it).
    async fn set_occurrence(
        &self,
        id: &AlarmId,
        occurrence: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError>;

    /// Atomically transition the occurrence state from `expected` to `next`.
    ///
    /// Returns `Ok(false)` without modifying anything when the current state
    /// does not match `expected` (or no occurrence exists). This is the
    /// compare-and-set primitive that makes duplicate triggers a no-op.
    async fn transition_occurrence(
        &self,
        id: &AlarmId,
        expected: OccurrenceState,
        next: OccurrenceState,
    ) -> Result<bool, StoreError>;

    /// Atomically finish the current occurrence and install the next one.
    ///
    /// With `Some(next)` the occurrence is replaced in a single durable
    /// write; with `None` the occurrence is cleared and the alarm disabled
    /// (retired). Atomicity here is what prevents a crash between "mark
    /// delivered" and "compute next occurrence" from dropping or
    /// double-firing a repeating alarm.
    async fn complete_occurrence(
        &self,
        id: &AlarmId,
        next: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError>;
}

/// Run a store write, retrying transient failures per the policy.
pub async fn with_retry<T, F, Fut>(policy: &WriteRetry, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.should_retry(attempts) => {
                attempts += 1;
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
