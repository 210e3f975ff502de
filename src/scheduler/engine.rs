//! Alarm engine implementation.
//!
//! The engine owns the occurrence state machine:
//!
//! `Scheduled -> Triggered -> Delivering -> {Acknowledged | Snoozed}`
//!
//! and is responsible for:
//! - Arming alarms through the background task coordinator
//! - Resolving OS wake callbacks to occurrences and starting deliveries
//!   exactly once per occurrence
//! - Routing dismiss/snooze back into rescheduling
//! - Re-arming everything on launch/refresh
//! - Renewing the background execution budget
//!
//! All commands are processed to completion, one at a time, on a single
//! loop task; concurrent OS callbacks converge through the store's
//! serialized compare-and-set transitions.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::core::types::{AlarmId, OccurrenceId};
use crate::core::Alarm;
use crate::delivery::{AlertSink, Deliverer, DeliveryHandle, DeliveryOutcome, DeliveryReport};
use crate::events::{Event, EventBus};
use crate::platform::{BudgetCoordinator, WakePlatform, REQUIRED_CAPABILITIES};
use crate::storage::{with_retry, AlarmStore, OccurrenceRecord, OccurrenceState, StoredAlarm};

use super::handle::EngineHandle;
use super::rearm::{self, compute_next, RearmReport};
use super::types::{EngineCommand, EngineError, EngineState, UserAction};

/// Buffer size for the command channel between EngineHandle and the engine.
const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Buffer size for delivery outcome reports.
const REPORT_CHANNEL_BUFFER: usize = 32;

/// The alarm scheduling and delivery engine.
pub struct AlarmEngine<S, P, A> {
    store: Arc<S>,
    platform: Arc<P>,
    sink: Arc<A>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl<S, P, A> AlarmEngine<S, P, A>
where
    S: AlarmStore + 'static,
    P: WakePlatform + 'static,
    A: AlertSink + 'static,
{
    /// Create a new engine over the given store, platform, and alert sink.
    pub fn new(store: S, platform: P, sink: A) -> Self {
        Self::with_shared(Arc::new(store), Arc::new(platform), Arc::new(sink))
    }

    /// Create an engine over shared components (useful for testing).
    pub fn with_shared(store: Arc<S>, platform: Arc<P>, sink: Arc<A>) -> Self {
        Self {
            store,
            platform,
            sink,
            events: Arc::new(EventBus::new()),
            config: EngineConfig::default(),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.events = Arc::new(event_bus);
        self
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Declare the engine's background execution categories to the OS.
    ///
    /// Invoked once at launch, before [`AlarmEngine::start`].
    pub fn register_background_capability(&self) {
        self.platform.declare_capabilities(REQUIRED_CAPABILITIES);
    }

    /// Start the engine and return a handle for controlling it.
    pub async fn start(self) -> (EngineHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(EngineState::Running));

        let handle = EngineHandle::new(command_tx, Arc::clone(&state));

        let engine_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, engine_task)
    }

    /// Main engine loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        state: Arc<RwLock<EngineState>>,
    ) {
        let coordinator = BudgetCoordinator::new(
            Arc::clone(&self.platform),
            Arc::clone(&self.events),
            self.config.initial_budget,
            self.config.renewal_margin,
        );
        let deliverer = Deliverer::new(Arc::clone(&self.sink), self.config.delivery_cutoff);
        let (report_tx, mut report_rx) = mpsc::channel(REPORT_CHANNEL_BUFFER);
        let mut deliveries: HashMap<AlarmId, DeliveryHandle> = HashMap::new();
        let mut budget_tick = tokio::time::interval(self.config.budget_check_interval);
        budget_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(command) = command_rx.recv() => {
                    match command {
                        EngineCommand::Create { alarm, response } => {
                            let result = self
                                .handle_create(&coordinator, &deliverer, &mut deliveries, &report_tx, alarm)
                                .await;
                            let _ = response.send(result);
                        }
                        EngineCommand::Update { alarm, response } => {
                            let result = self
                                .handle_update(&coordinator, &deliverer, &mut deliveries, &report_tx, alarm)
                                .await;
                            let _ = response.send(result);
                        }
                        EngineCommand::Delete { id, response } => {
                            let result = self.handle_delete(&coordinator, &id).await;
                            let _ = response.send(result);
                        }
                        EngineCommand::Get { id, response } => {
                            let result = self.handle_get(&id).await;
                            let _ = response.send(result);
                        }
                        EngineCommand::List { response } => {
                            let result = self.store.list().await.map_err(EngineError::from);
                            let _ = response.send(result);
                        }
                        EngineCommand::Refresh { response } => {
                            let result = self
                                .handle_refresh(&coordinator, &deliverer, &mut deliveries, &report_tx)
                                .await;
                            let _ = response.send(result);
                        }
                        EngineCommand::Wake { alarm_id, occurrence_id } => {
                            self.handle_wake(
                                &coordinator,
                                &deliverer,
                                &mut deliveries,
                                &report_tx,
                                &alarm_id,
                                occurrence_id,
                            )
                            .await;
                        }
                        EngineCommand::Action { alarm_id, occurrence_id, action, response } => {
                            let result = self
                                .handle_action(&deliveries, &alarm_id, occurrence_id, action)
                                .await;
                            let _ = response.send(result);
                        }
                        EngineCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = EngineState::Stopped;
                            drop(s);

                            for (_, delivery) in deliveries.drain() {
                                delivery.abort();
                            }

                            let _ = response.send(());
                            break;
                        }
                    }
                }

                Some(report) = report_rx.recv() => {
                    self.finish_delivery(&coordinator, &mut deliveries, report).await;
                }

                _ = budget_tick.tick() => {
                    let next_fire = self.earliest_fire().await;
                    coordinator.maintain(next_fire).await;
                }
            }
        }
    }

    /// Earliest scheduled fire time across all alarms, for budget planning.
    async fn earliest_fire(&self) -> Option<chrono::DateTime<Utc>> {
        match self.store.list().await {
            Ok(alarms) => alarms
                .into_iter()
                .filter_map(|stored| stored.occurrence)
                .filter(|occ| occ.state == OccurrenceState::Scheduled)
                .map(|occ| occ.fire_at)
                .min(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list alarms for budget planning");
                None
            }
        }
    }

    async fn handle_create(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliverer: &Deliverer<A>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report_tx: &mpsc::Sender<DeliveryReport>,
        alarm: Alarm,
    ) -> Result<(), EngineError> {
        if !alarm.is_repeating() && alarm.trigger_time <= Utc::now() {
            return Err(EngineError::TriggerInPast(alarm.id.to_string()));
        }

        let id = alarm.id.clone();
        with_retry(&self.config.write_retry, || self.store.create(alarm.clone())).await?;
        tracing::info!(alarm_id = %id, trigger_time = %alarm.trigger_time, "Alarm created");

        self.reconcile_one(coordinator, deliverer, deliveries, report_tx, &id)
            .await
    }

    async fn handle_update(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliverer: &Deliverer<A>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report_tx: &mpsc::Sender<DeliveryReport>,
        alarm: Alarm,
    ) -> Result<(), EngineError> {
        if alarm.enabled && !alarm.is_repeating() && alarm.trigger_time <= Utc::now() {
            return Err(EngineError::TriggerInPast(alarm.id.to_string()));
        }

        let id = alarm.id.clone();
        let result = with_retry(&self.config.write_retry, || self.store.update(alarm.clone())).await;
        match result {
            Ok(()) => {}
            Err(crate::storage::StoreError::NotFound(_)) => {
                return Err(EngineError::AlarmNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(alarm_id = %id, "Alarm updated");

        self.reconcile_one(coordinator, deliverer, deliveries, report_tx, &id)
            .await
    }

    async fn handle_delete(
        &self,
        coordinator: &BudgetCoordinator<P>,
        id: &AlarmId,
    ) -> Result<(), EngineError> {
        let stored = match self.store.get(id).await {
            Ok(stored) => stored,
            Err(crate::storage::StoreError::NotFound(_)) => {
                return Err(EngineError::AlarmNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(occ) = &stored.occurrence {
            if let Some(registration) = occ.registration {
                coordinator.release(registration).await;
                self.events
                    .emit(Event::registration_released(id.clone(), registration))
                    .await;
            }
        }

        with_retry(&self.config.write_retry, || self.store.delete(id)).await?;
        tracing::info!(alarm_id = %id, "Alarm deleted");
        // An in-flight delivery for this alarm keeps running until
        // acknowledged; its finalization finds no stored alarm and stops.
        Ok(())
    }

    async fn handle_get(&self, id: &AlarmId) -> Result<StoredAlarm, EngineError> {
        match self.store.get(id).await {
            Ok(stored) => Ok(stored),
            Err(crate::storage::StoreError::NotFound(_)) => {
                Err(EngineError::AlarmNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_refresh(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliverer: &Deliverer<A>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report_tx: &mpsc::Sender<DeliveryReport>,
    ) -> Result<RearmReport, EngineError> {
        let report = rearm::rearm_all(
            &*self.store,
            coordinator,
            &self.events,
            &self.config.write_retry,
            Utc::now(),
        )
        .await?;

        tracing::info!(
            reserved = report.reserved,
            released = report.released,
            unchanged = report.unchanged,
            due = report.due.len(),
            "Reconciled alarms"
        );

        for (alarm_id, occurrence_id) in &report.due {
            self.handle_wake(
                coordinator,
                deliverer,
                deliveries,
                report_tx,
                alarm_id,
                *occurrence_id,
            )
            .await;
        }

        coordinator.maintain(self.earliest_fire().await).await;
        Ok(report)
    }

    /// Reconcile a single alarm after a create/update.
    async fn reconcile_one(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliverer: &Deliverer<A>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report_tx: &mpsc::Sender<DeliveryReport>,
        id: &AlarmId,
    ) -> Result<(), EngineError> {
        let stored = self.store.get(id).await?;
        let outcome = rearm::reconcile(
            &*self.store,
            coordinator,
            &self.events,
            &self.config.write_retry,
            &stored,
            Utc::now(),
        )
        .await?;

        if let Some(occurrence_id) = outcome.due {
            self.handle_wake(coordinator, deliverer, deliveries, report_tx, id, occurrence_id)
                .await;
        }
        Ok(())
    }

    /// Resolve a wake callback to an occurrence and start delivery.
    ///
    /// Exactly once per occurrence: the `Scheduled -> Triggered` transition
    /// is checked-and-set in the store, so a duplicate callback for an
    /// occurrence already in flight is dropped, not delivered twice.
    async fn handle_wake(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliverer: &Deliverer<A>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report_tx: &mpsc::Sender<DeliveryReport>,
        alarm_id: &AlarmId,
        occurrence_id: OccurrenceId,
    ) {
        let stored = match self.store.get(alarm_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!(alarm_id = %alarm_id, error = %e, "Wake for unknown alarm dropped");
                return;
            }
        };

        let Some(occ) = &stored.occurrence else {
            tracing::debug!(alarm_id = %alarm_id, "Wake with no live occurrence dropped");
            return;
        };
        if occ.occurrence_id != occurrence_id {
            tracing::debug!(
                alarm_id = %alarm_id,
                stale = %occurrence_id,
                current = %occ.occurrence_id,
                "Stale wake dropped"
            );
            return;
        }

        let now = Utc::now();

        if !stored.alarm.enabled {
            // Disabled before the trigger: cancel instead of delivering.
            if let Some(registration) = occ.registration {
                coordinator.release(registration).await;
            }
            if let Err(e) = self.store.set_occurrence(alarm_id, None).await {
                tracing::warn!(alarm_id = %alarm_id, error = %e, "Failed to clear occurrence of disabled alarm");
            }
            return;
        }

        // A wake earlier than the tolerance window means the platform timer
        // drifted (e.g. clock change): re-arm instead of delivering early.
        if occ.fire_at - now > chrono::Duration::from_std(self.config.tolerance).unwrap_or_default()
        {
            tracing::warn!(
                alarm_id = %alarm_id,
                fire_at = %occ.fire_at,
                "Early wake; re-arming occurrence"
            );
            if let Some(registration) = occ.registration {
                coordinator.release(registration).await;
            }
            let mut record = occ.clone();
            record.registration = None;
            if let Err(e) = self.store.set_occurrence(alarm_id, Some(record)).await {
                tracing::warn!(alarm_id = %alarm_id, error = %e, "Failed to clear registration of early wake");
                return;
            }
            if let Ok(stored) = self.store.get(alarm_id).await {
                if let Err(e) = rearm::reconcile(
                    &*self.store,
                    coordinator,
                    &self.events,
                    &self.config.write_retry,
                    &stored,
                    now,
                )
                .await
                {
                    tracing::warn!(alarm_id = %alarm_id, error = %e, "Failed to re-arm early wake");
                }
            }
            return;
        }

        let triggered = match self
            .store
            .transition_occurrence(alarm_id, OccurrenceState::Scheduled, OccurrenceState::Triggered)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                tracing::warn!(alarm_id = %alarm_id, error = %e, "Trigger transition failed");
                return;
            }
        };
        if !triggered {
            tracing::debug!(alarm_id = %alarm_id, occurrence_id = %occurrence_id, "Duplicate trigger dropped");
            return;
        }
        self.events
            .emit(Event::alarm_triggered(alarm_id.clone(), occurrence_id))
            .await;

        let delivering = match self
            .store
            .transition_occurrence(alarm_id, OccurrenceState::Triggered, OccurrenceState::Delivering)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                tracing::warn!(alarm_id = %alarm_id, error = %e, "Delivering transition failed");
                return;
            }
        };
        if !delivering || deliveries.contains_key(alarm_id) {
            tracing::debug!(alarm_id = %alarm_id, "Occurrence already delivering");
            return;
        }

        let handle = deliverer.deliver(&stored.alarm, occurrence_id, report_tx.clone());
        deliveries.insert(alarm_id.clone(), handle);
        self.events
            .emit(Event::delivery_started(alarm_id.clone(), occurrence_id))
            .await;
        tracing::info!(alarm_id = %alarm_id, occurrence_id = %occurrence_id, "Delivery started");
    }

    /// Route a user response to the in-flight delivery for an occurrence.
    async fn handle_action(
        &self,
        deliveries: &HashMap<AlarmId, DeliveryHandle>,
        alarm_id: &AlarmId,
        occurrence_id: OccurrenceId,
        action: UserAction,
    ) -> Result<(), EngineError> {
        let delivery = deliveries
            .get(alarm_id)
            .filter(|d| d.occurrence_id() == occurrence_id)
            .ok_or_else(|| EngineError::NotDelivering(alarm_id.to_string()))?;

        let result = match action {
            UserAction::Dismiss => delivery.stop().await,
            UserAction::Snooze => delivery.snooze().await,
        };
        result.map_err(|_| EngineError::NotDelivering(alarm_id.to_string()))
    }

    /// Finalize a finished delivery: acknowledge and reschedule, snooze, or
    /// retire.
    async fn finish_delivery(
        &self,
        coordinator: &BudgetCoordinator<P>,
        deliveries: &mut HashMap<AlarmId, DeliveryHandle>,
        report: DeliveryReport,
    ) {
        deliveries.remove(&report.alarm_id);
        self.events
            .emit(Event::delivery_finished(
                report.alarm_id.clone(),
                report.occurrence_id,
                report.outcome,
            ))
            .await;

        let stored = match self.store.get(&report.alarm_id).await {
            Ok(stored) => stored,
            Err(_) => {
                // Deleted mid-delivery: nothing left to reschedule.
                tracing::debug!(alarm_id = %report.alarm_id, "Delivery finished for deleted alarm");
                return;
            }
        };
        let Some(occ) = stored.occurrence.clone() else {
            return;
        };
        if occ.occurrence_id != report.occurrence_id {
            return;
        }

        match report.outcome {
            DeliveryOutcome::Snoozed
                if stored.alarm.enabled && stored.alarm.snooze.allows(occ.snooze_count) =>
            {
                self.apply_snooze(coordinator, &stored, &occ).await;
            }
            // Snooze cap exceeded or alarm disabled: fall back to stop
            // semantics. Timeout is an implicit stop.
            _ => {
                self.acknowledge(coordinator, &stored).await;
            }
        }
    }

    /// Install the transient snooze occurrence.
    async fn apply_snooze(
        &self,
        coordinator: &BudgetCoordinator<P>,
        stored: &StoredAlarm,
        occ: &OccurrenceRecord,
    ) {
        let alarm_id = &stored.alarm.id;
        let Some(duration) = stored.alarm.snooze.duration() else {
            return;
        };
        let fire_at = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        let count = occ.snooze_count + 1;

        if let Ok(false) = self
            .store
            .transition_occurrence(alarm_id, OccurrenceState::Delivering, OccurrenceState::Snoozed)
            .await
        {
            tracing::debug!(alarm_id = %alarm_id, "Snooze for occurrence no longer delivering");
        }

        let mut record = OccurrenceRecord::snoozed(fire_at, count);
        record.registration = match coordinator
            .reserve(crate::platform::WakeRequest {
                alarm_id: alarm_id.clone(),
                occurrence_id: record.occurrence_id,
                fire_at,
            })
            .await
        {
            Ok(registration) => Some(registration),
            Err(e) => {
                self.events
                    .emit(Event::scheduling_denied(alarm_id.clone(), e.to_string()))
                    .await;
                None
            }
        };

        let occurrence_id = record.occurrence_id;
        if let Err(e) = with_retry(&self.config.write_retry, || {
            self.store.complete_occurrence(alarm_id, Some(record.clone()))
        })
        .await
        {
            tracing::error!(alarm_id = %alarm_id, error = %e, "Failed to persist snooze occurrence");
            return;
        }

        self.events
            .emit(Event::alarm_snoozed(alarm_id.clone(), occurrence_id, count, fire_at))
            .await;
        tracing::info!(alarm_id = %alarm_id, count, fire_at = %fire_at, "Alarm snoozed");
    }

    /// Acknowledge the delivered occurrence: reschedule a repeating alarm,
    /// retire a one-shot (or disabled) one.
    async fn acknowledge(&self, coordinator: &BudgetCoordinator<P>, stored: &StoredAlarm) {
        let alarm_id = &stored.alarm.id;
        let now = Utc::now();

        if let Ok(false) = self
            .store
            .transition_occurrence(
                alarm_id,
                OccurrenceState::Delivering,
                OccurrenceState::Acknowledged,
            )
            .await
        {
            tracing::debug!(alarm_id = %alarm_id, "Acknowledge for occurrence no longer delivering");
        }

        let next = if stored.alarm.enabled {
            match compute_next(&stored.alarm, now) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(alarm_id = %alarm_id, error = %e, "Failed to compute next occurrence");
                    None
                }
            }
        } else {
            // Disabled mid-delivery: acknowledged, but never rescheduled.
            None
        };

        match next {
            Some(fire_at) => {
                let mut record = OccurrenceRecord::scheduled(fire_at);
                record.registration = match coordinator
                    .reserve(crate::platform::WakeRequest {
                        alarm_id: alarm_id.clone(),
                        occurrence_id: record.occurrence_id,
                        fire_at,
                    })
                    .await
                {
                    Ok(registration) => Some(registration),
                    Err(e) => {
                        self.events
                            .emit(Event::scheduling_denied(alarm_id.clone(), e.to_string()))
                            .await;
                        None
                    }
                };

                let occurrence_id = record.occurrence_id;
                if let Err(e) = with_retry(&self.config.write_retry, || {
                    self.store.complete_occurrence(alarm_id, Some(record.clone()))
                })
                .await
                {
                    tracing::error!(alarm_id = %alarm_id, error = %e, "Failed to persist next occurrence");
                    return;
                }
                self.events
                    .emit(Event::alarm_scheduled(alarm_id.clone(), occurrence_id, fire_at))
                    .await;
                tracing::info!(alarm_id = %alarm_id, fire_at = %fire_at, "Alarm rescheduled");
            }
            None => {
                if let Err(e) = with_retry(&self.config.write_retry, || {
                    self.store.complete_occurrence(alarm_id, None)
                })
                .await
                {
                    tracing::error!(alarm_id = %alarm_id, error = %e, "Failed to retire alarm");
                    return;
                }
                self.events.emit(Event::alarm_retired(alarm_id.clone())).await;
                tracing::info!(alarm_id = %alarm_id, "Alarm retired");
            }
        }
    }
}
