//! Alert delivery: rendering lifecycle from trigger to acknowledgment.
//!
//! [`Deliverer::deliver`] spawns a bounded task that drives the
//! [`AlertSink`] per the alarm's sound profile: fade-in ramp, looping, and a
//! safety cutoff so delivery never runs unbounded if the user never
//! responds. The task is controlled through a [`DeliveryHandle`] and reports
//! its outcome on a channel the engine loop consumes.

mod sink;

pub use sink::{AlertSink, LogAlertSink};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::types::{AlarmId, OccurrenceId};
use crate::core::Alarm;

/// Buffer size for a delivery's command channel.
const COMMAND_CHANNEL_BUFFER: usize = 4;

/// Number of volume steps across the fade-in ramp.
const FADE_STEPS: u32 = 20;

/// Errors that can occur controlling a delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The delivery task already finished.
    #[error("delivery already finished")]
    Finished,

    /// The alert sink failed to start.
    #[error("alert sink failure: {0}")]
    Sink(String),
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// The user dismissed the alert.
    Dismissed,
    /// The user snoozed the alert.
    Snoozed,
    /// The safety cutoff elapsed without a response (implicit stop).
    TimedOut,
}

/// Commands accepted by a running delivery task.
enum DeliveryCommand {
    Stop,
    Snooze,
}

/// Report sent to the engine loop when a delivery finishes.
#[derive(Debug)]
pub struct DeliveryReport {
    pub alarm_id: AlarmId,
    pub occurrence_id: OccurrenceId,
    pub outcome: DeliveryOutcome,
}

/// Handle for controlling an in-flight delivery.
pub struct DeliveryHandle {
    command_tx: mpsc::Sender<DeliveryCommand>,
    occurrence_id: OccurrenceId,
    task: JoinHandle<()>,
}

impl DeliveryHandle {
    /// The occurrence this delivery belongs to.
    pub fn occurrence_id(&self) -> OccurrenceId {
        self.occurrence_id
    }

    /// Stop the alert; the delivery reports `Dismissed`.
    pub async fn stop(&self) -> Result<(), DeliveryError> {
        self.command_tx
            .send(DeliveryCommand::Stop)
            .await
            .map_err(|_| DeliveryError::Finished)
    }

    /// Snooze the alert; the delivery reports `Snoozed`.
    pub async fn snooze(&self) -> Result<(), DeliveryError> {
        self.command_tx
            .send(DeliveryCommand::Snooze)
            .await
            .map_err(|_| DeliveryError::Finished)
    }

    /// Abort the delivery task outright (shutdown path).
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawns and configures delivery tasks.
pub struct Deliverer<A> {
    sink: Arc<A>,
    cutoff: Duration,
}

impl<A: AlertSink + 'static> Deliverer<A> {
    /// Create a deliverer over the given sink with a safety cutoff.
    pub fn new(sink: Arc<A>, cutoff: Duration) -> Self {
        Self { sink, cutoff }
    }

    /// Start rendering the alarm's alert.
    ///
    /// The task runs until stopped, snoozed, or the safety cutoff elapses,
    /// then stops the sink and sends a [`DeliveryReport`] on `report_tx`.
    pub fn deliver(
        &self,
        alarm: &Alarm,
        occurrence_id: OccurrenceId,
        report_tx: mpsc::Sender<DeliveryReport>,
    ) -> DeliveryHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let sink = Arc::clone(&self.sink);
        let cutoff = self.cutoff;
        let alarm_id = alarm.id.clone();
        let profile = alarm.sound.clone();

        let task = tokio::spawn(async move {
            let outcome = render(&*sink, &profile, cutoff, command_rx).await;
            sink.stop().await;
            let report = DeliveryReport {
                alarm_id,
                occurrence_id,
                outcome,
            };
            if report_tx.send(report).await.is_err() {
                tracing::warn!(occurrence_id = %occurrence_id, "Delivery report receiver dropped");
            }
        });

        DeliveryHandle {
            command_tx,
            occurrence_id,
            task,
        }
    }
}

/// Drive the sink until a command arrives or the cutoff elapses.
async fn render<A: AlertSink + ?Sized>(
    sink: &A,
    profile: &crate::core::SoundProfile,
    cutoff: Duration,
    mut command_rx: mpsc::Receiver<DeliveryCommand>,
) -> DeliveryOutcome {
    if let Err(e) = sink.start(profile).await {
        // A silent alarm is still an alarm; the notification side of the
        // sink may have worked, so keep waiting for a response.
        tracing::error!(error = %e, "Alert sink failed to start");
    }

    let deadline = tokio::time::Instant::now() + cutoff;

    // Fade-in ramp, then hold at target volume.
    let (steps, step_interval) = if profile.fade_in.is_zero() {
        sink.set_volume(profile.volume).await;
        (0u32, Duration::from_secs(1))
    } else {
        // interval() panics on a zero period.
        (FADE_STEPS, (profile.fade_in / FADE_STEPS).max(Duration::from_millis(1)))
    };
    let mut ramp = tokio::time::interval(step_interval);
    ramp.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut step = 0u32;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(DeliveryCommand::Stop) => return DeliveryOutcome::Dismissed,
                    Some(DeliveryCommand::Snooze) => return DeliveryOutcome::Snoozed,
                    // All handles dropped: engine is shutting down.
                    None => return DeliveryOutcome::TimedOut,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!("Delivery safety cutoff reached without acknowledgment");
                return DeliveryOutcome::TimedOut;
            }
            _ = ramp.tick(), if step < steps => {
                step += 1;
                let volume = profile.volume * (step as f32 / steps as f32);
                sink.set_volume(volume).await;
            }
        }
    }
}
