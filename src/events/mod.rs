//! Lifecycle events and event handling.
//!
//! This module provides event emission for alarm lifecycle and platform
//! budget events, enabling observability into scheduling and delivery. The
//! budget/denial warning channel required by the error design lives here:
//! [`Event::BudgetWarning`] and [`Event::SchedulingDenied`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::types::{AlarmId, OccurrenceId, RegistrationId};
use crate::delivery::DeliveryOutcome;

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// An occurrence was computed and armed for an alarm.
    AlarmScheduled {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        fire_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A wake callback resolved to an occurrence at/after its fire time.
    AlarmTriggered {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        timestamp: DateTime<Utc>,
    },

    /// Alert rendering began for an occurrence.
    DeliveryStarted {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        timestamp: DateTime<Utc>,
    },

    /// Alert rendering finished.
    DeliveryFinished {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        outcome: DeliveryOutcome,
        timestamp: DateTime<Utc>,
    },

    /// An occurrence was snoozed.
    AlarmSnoozed {
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        /// Snoozes used so far, including this one.
        count: u32,
        fire_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A one-shot alarm finished its lifecycle and was retired.
    AlarmRetired {
        alarm_id: AlarmId,
        timestamp: DateTime<Utc>,
    },

    /// A platform wake registration was released.
    RegistrationReleased {
        alarm_id: AlarmId,
        registration: RegistrationId,
        timestamp: DateTime<Utc>,
    },

    /// The background execution budget could not be renewed; the engine is
    /// relying solely on the OS wake primitive.
    BudgetWarning {
        remaining: Duration,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The platform refused a wake registration (e.g. permission revoked).
    SchedulingDenied {
        alarm_id: AlarmId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::AlarmScheduled { timestamp, .. } => *timestamp,
            Event::AlarmTriggered { timestamp, .. } => *timestamp,
            Event::DeliveryStarted { timestamp, .. } => *timestamp,
            Event::DeliveryFinished { timestamp, .. } => *timestamp,
            Event::AlarmSnoozed { timestamp, .. } => *timestamp,
            Event::AlarmRetired { timestamp, .. } => *timestamp,
            Event::RegistrationReleased { timestamp, .. } => *timestamp,
            Event::BudgetWarning { timestamp, .. } => *timestamp,
            Event::SchedulingDenied { timestamp, .. } => *timestamp,
        }
    }

    /// Create an AlarmScheduled event.
    pub fn alarm_scheduled(
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Event::AlarmScheduled {
            alarm_id,
            occurrence_id,
            fire_at,
            timestamp: Utc::now(),
        }
    }

    /// Create an AlarmTriggered event.
    pub fn alarm_triggered(alarm_id: AlarmId, occurrence_id: OccurrenceId) -> Self {
        Event::AlarmTriggered {
            alarm_id,
            occurrence_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a DeliveryStarted event.
    pub fn delivery_started(alarm_id: AlarmId, occurrence_id: OccurrenceId) -> Self {
        Event::DeliveryStarted {
            alarm_id,
            occurrence_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a DeliveryFinished event.
    pub fn delivery_finished(
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        outcome: DeliveryOutcome,
    ) -> Self {
        Event::DeliveryFinished {
            alarm_id,
            occurrence_id,
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Create an AlarmSnoozed event.
    pub fn alarm_snoozed(
        alarm_id: AlarmId,
        occurrence_id: OccurrenceId,
        count: u32,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Event::AlarmSnoozed {
            alarm_id,
            occurrence_id,
            count,
            fire_at,
            timestamp: Utc::now(),
        }
    }

    /// Create an AlarmRetired event.
    pub fn alarm_retired(alarm_id: AlarmId) -> Self {
        Event::AlarmRetired {
            alarm_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a RegistrationReleased event.
    pub fn registration_released(alarm_id: AlarmId, registration: RegistrationId) -> Self {
        Event::RegistrationReleased {
            alarm_id,
            registration,
            timestamp: Utc::now(),
        }
    }

    /// Create a BudgetWarning event.
    pub fn budget_warning(remaining: Duration, reason: impl Into<String>) -> Self {
        Event::BudgetWarning {
            remaining,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a SchedulingDenied event.
    pub fn scheduling_denied(alarm_id: AlarmId, reason: impl Into<String>) -> Self {
        Event::SchedulingDenied {
            alarm_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
