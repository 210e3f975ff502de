//! Built-in event handlers.

use async_trait::async_trait;

use crate::events::{Event, EventHandler};

/// Event handler that narrates alarm lifecycle events through tracing.
///
/// Registered by the host binary; useful anywhere a human-readable account
/// of scheduling and delivery is wanted.
pub struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::AlarmScheduled {
                alarm_id, fire_at, ..
            } => {
                tracing::info!("Alarm '{}' scheduled for {}", alarm_id, fire_at);
            }
            Event::AlarmTriggered { alarm_id, .. } => {
                tracing::info!("Alarm '{}' triggered", alarm_id);
            }
            Event::DeliveryStarted { alarm_id, .. } => {
                tracing::info!("Alarm '{}' delivering", alarm_id);
            }
            Event::DeliveryFinished {
                alarm_id, outcome, ..
            } => {
                tracing::info!("Alarm '{}' delivery finished: {:?}", alarm_id, outcome);
            }
            Event::AlarmSnoozed {
                alarm_id,
                count,
                fire_at,
                ..
            } => {
                tracing::info!(
                    "Alarm '{}' snoozed ({} used), next fire {}",
                    alarm_id,
                    count,
                    fire_at
                );
            }
            Event::AlarmRetired { alarm_id, .. } => {
                tracing::info!("Alarm '{}' retired", alarm_id);
            }
            Event::RegistrationReleased { alarm_id, .. } => {
                tracing::debug!("Alarm '{}' wake registration released", alarm_id);
            }
            Event::BudgetWarning {
                remaining, reason, ..
            } => {
                tracing::warn!(
                    "Background budget exhausted ({:?} remaining): {}",
                    remaining,
                    reason
                );
            }
            Event::SchedulingDenied {
                alarm_id, reason, ..
            } => {
                tracing::warn!("Alarm '{}' wake registration denied: {}", alarm_id, reason);
            }
        }
    }
}
