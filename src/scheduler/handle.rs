//! Handle for controlling a running engine.
//!
//! The handle is the host application's boundary: lifecycle callbacks
//! (`on_launch`, `on_wake`, `on_notification_action`) and alarm CRUD all
//! funnel into the engine's command channel and are processed one at a time.

use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

use crate::core::types::{AlarmId, OccurrenceId};
use crate::core::Alarm;
use crate::storage::StoredAlarm;

use super::rearm::RearmReport;
use super::types::{EngineCommand, EngineError, EngineState, UserAction};

/// Handle for controlling the engine.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: tokio::sync::mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub(crate) fn new(
        command_tx: tokio::sync::mpsc::Sender<EngineCommand>,
        state: Arc<RwLock<EngineState>>,
    ) -> Self {
        Self { command_tx, state }
    }

    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineCommand,
        operation: &str,
    ) -> Result<T, EngineError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                EngineError::Channel(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            EngineError::Channel(format!("failed to receive {} response", operation))
        })?
    }

    /// Create a new alarm; it is armed before this returns.
    pub async fn create_alarm(&self, alarm: Alarm) -> Result<(), EngineError> {
        self.send_result_command(
            |response| EngineCommand::Create { alarm, response },
            "create",
        )
        .await
    }

    /// Update an alarm; its registration is reconciled before this returns.
    pub async fn update_alarm(&self, alarm: Alarm) -> Result<(), EngineError> {
        self.send_result_command(
            |response| EngineCommand::Update { alarm, response },
            "update",
        )
        .await
    }

    /// Delete an alarm and release its pending registration.
    pub async fn delete_alarm(&self, id: impl Into<AlarmId>) -> Result<(), EngineError> {
        let id = id.into();
        self.send_result_command(|response| EngineCommand::Delete { id, response }, "delete")
            .await
    }

    /// Fetch one alarm with its occurrence state.
    pub async fn get_alarm(&self, id: impl Into<AlarmId>) -> Result<StoredAlarm, EngineError> {
        let id = id.into();
        self.send_result_command(|response| EngineCommand::Get { id, response }, "get")
            .await
    }

    /// List all alarms.
    pub async fn list_alarms(&self) -> Result<Vec<StoredAlarm>, EngineError> {
        self.send_result_command(|response| EngineCommand::List { response }, "list")
            .await
    }

    /// Reconcile the store against live platform registrations.
    pub async fn refresh(&self) -> Result<RearmReport, EngineError> {
        self.send_result_command(|response| EngineCommand::Refresh { response }, "refresh")
            .await
    }

    /// Host lifecycle hook: invoked on every launch.
    ///
    /// Re-arms every pending alarm and triggers any fire missed while the
    /// process was dead.
    pub async fn on_launch(&self, cold_start: bool) -> Result<RearmReport, EngineError> {
        tracing::info!(cold_start, "Engine launch hook");
        self.refresh().await
    }

    /// OS timed-wake callback for an occurrence.
    ///
    /// Fire-and-forget: resolution and duplicate dropping happen inside the
    /// engine loop.
    pub async fn on_wake(&self, alarm_id: impl Into<AlarmId>, occurrence_id: OccurrenceId) {
        let alarm_id = alarm_id.into();
        if self
            .command_tx
            .send(EngineCommand::Wake {
                alarm_id: alarm_id.clone(),
                occurrence_id,
            })
            .await
            .is_err()
        {
            tracing::warn!(alarm_id = %alarm_id, "Wake dropped: engine stopped");
        }
    }

    /// OS notification-interaction callback for a delivering occurrence.
    pub async fn on_notification_action(
        &self,
        action: UserAction,
        alarm_id: impl Into<AlarmId>,
        occurrence_id: OccurrenceId,
    ) -> Result<(), EngineError> {
        let alarm_id = alarm_id.into();
        self.send_result_command(
            |response| EngineCommand::Action {
                alarm_id,
                occurrence_id,
                action,
                response,
            },
            "action",
        )
        .await
    }

    /// Dismiss the delivering occurrence of an alarm.
    pub async fn dismiss(
        &self,
        alarm_id: impl Into<AlarmId>,
        occurrence_id: OccurrenceId,
    ) -> Result<(), EngineError> {
        self.on_notification_action(UserAction::Dismiss, alarm_id, occurrence_id)
            .await
    }

    /// Snooze the delivering occurrence of an alarm.
    pub async fn snooze(
        &self,
        alarm_id: impl Into<AlarmId>,
        occurrence_id: OccurrenceId,
    ) -> Result<(), EngineError> {
        self.on_notification_action(UserAction::Snooze, alarm_id, occurrence_id)
            .await
    }

    /// Shut down the engine.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Shutdown {
                response: response_tx,
            })
            .await
            .map_err(|_| EngineError::Channel("failed to send shutdown command".into()))?;

        response_rx
            .await
            .map_err(|_| EngineError::Channel("failed to receive shutdown response".into()))
    }

    /// Get the current engine state.
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Check if the engine is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == EngineState::Running
    }
}
