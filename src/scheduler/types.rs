//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the
//! alarm engine.

use tokio::sync::oneshot;

use crate::core::types::{AlarmId, OccurrenceId};
use crate::core::{Alarm, RepeatError};
use crate::storage::{StoreError, StoredAlarm};

use super::rearm::RearmReport;

/// Errors that can occur in the alarm engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Alarm not found.
    #[error("alarm not found: {0}")]
    AlarmNotFound(String),

    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Repeat rule error.
    #[error("repeat rule error: {0}")]
    Repeat(#[from] RepeatError),

    /// Channel error.
    #[error("channel error: {0}")]
    Channel(String),

    /// A one-shot alarm's trigger time is not in the future.
    #[error("trigger time is in the past for alarm: {0}")]
    TriggerInPast(String),

    /// No delivery is in progress for this occurrence.
    #[error("no delivery in progress for alarm: {0}")]
    NotDelivering(String),
}

/// State of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine is stopped.
    Stopped,
    /// Engine is running.
    Running,
}

/// User responses routed back from the notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Dismiss the alert and acknowledge the occurrence.
    Dismiss,
    /// Snooze the alert.
    Snooze,
}

/// Commands that can be sent to the engine.
pub(crate) enum EngineCommand {
    /// Create a new alarm and arm it.
    Create {
        alarm: Alarm,
        response: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Update an alarm and reconcile its registration.
    Update {
        alarm: Alarm,
        response: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Delete an alarm and release its registration.
    Delete {
        id: AlarmId,
        response: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Fetch one alarm.
    Get {
        id: AlarmId,
        response: oneshot::Sender<Result<StoredAlarm, EngineError>>,
    },
    /// List all alarms.
    List {
        response: oneshot::Sender<Result<Vec<StoredAlarm>, EngineError>>,
    },
    /// Reconcile the store against live platform registrations.
    Refresh {
        response: oneshot::Sender<Result<RearmReport, EngineError>>,
    },
    /// OS timed-wake callback for an occurrence.
    Wake {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
    },
    /// User interacted with the notification of a delivering occurrence.
    Action {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        action: UserAction,
        response: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Shut down the engine.
    Shutdown { response: oneshot::Sender<()> },
}
