//! Next-occurrence computation and registration reconciliation.
//!
//! [`compute_next`] is the pure core: given an alarm and a reference
//! instant, where does it fire next. [`rearm_all`] reconciles the store
//! against live platform registrations on every execution opportunity
//! (launch, wake, explicit refresh); it is idempotent, so calling it twice
//! in a row with no state change performs no platform calls.

use chrono::{DateTime, Utc};

use crate::core::backoff::WriteRetry;
use crate::core::types::{AlarmId, OccurrenceId, RegistrationId};
use crate::core::{Alarm, RepeatError};
use crate::events::{Event, EventBus};
use crate::platform::{BudgetCoordinator, WakePlatform, WakeRequest};
use crate::storage::{with_retry, AlarmStore, OccurrenceRecord, OccurrenceState, StoredAlarm};

use super::types::EngineError;

/// Compute the next fire instant for an alarm, strictly after `after`.
///
/// Pure function of the alarm's rule and trigger time. Returns `None` when
/// the alarm is disabled, or when a one-shot alarm has already fired and
/// should retire.
pub fn compute_next(
    alarm: &Alarm,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RepeatError> {
    if !alarm.enabled {
        return Ok(None);
    }
    alarm.repeat.next_after(alarm.trigger_time, after)
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct RearmReport {
    /// Registrations created.
    pub reserved: usize,
    /// Registrations released.
    pub released: usize,
    /// Alarms that required no platform call.
    pub unchanged: usize,
    /// Occurrences whose fire time already passed; the engine triggers
    /// these immediately rather than silently skipping them.
    pub due: Vec<(AlarmId, OccurrenceId)>,
}

/// What reconciling a single alarm did.
#[derive(Debug, Default)]
pub(crate) struct ReconcileOutcome {
    pub reserved: bool,
    pub released: bool,
    pub due: Option<OccurrenceId>,
}

/// Reconcile every alarm in the store against platform registrations.
///
/// Alarms are processed in ascending (fire time, id) order so delivery
/// ordering for identical fire times is deterministic.
pub(crate) async fn rearm_all<S, P>(
    store: &S,
    coordinator: &BudgetCoordinator<P>,
    events: &EventBus,
    retry: &WriteRetry,
    now: DateTime<Utc>,
) -> Result<RearmReport, EngineError>
where
    S: AlarmStore,
    P: WakePlatform,
{
    let mut alarms = store.list().await?;
    alarms.sort_by_key(|stored| {
        (
            stored.occurrence.as_ref().map(|occ| occ.fire_at),
            stored.alarm.id.clone(),
        )
    });

    let mut report = RearmReport::default();
    for stored in &alarms {
        let outcome = reconcile(store, coordinator, events, retry, stored, now).await?;
        if outcome.reserved {
            report.reserved += 1;
        }
        if outcome.released {
            report.released += 1;
        }
        if !outcome.reserved && !outcome.released && outcome.due.is_none() {
            report.unchanged += 1;
        }
        if let Some(occurrence_id) = outcome.due {
            report.due.push((stored.alarm.id.clone(), occurrence_id));
        }
    }

    Ok(report)
}

/// Reconcile a single alarm against its platform registration.
pub(crate) async fn reconcile<S, P>(
    store: &S,
    coordinator: &BudgetCoordinator<P>,
    events: &EventBus,
    retry: &WriteRetry,
    stored: &StoredAlarm,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, EngineError>
where
    S: AlarmStore,
    P: WakePlatform,
{
    let alarm = &stored.alarm;
    let id = &alarm.id;

    if !alarm.enabled {
        return match &stored.occurrence {
            // An in-flight delivery completes and acknowledges normally;
            // its finalization will see the disabled flag and not reschedule.
            Some(occ) if occ.state.is_in_flight() => Ok(ReconcileOutcome::default()),
            Some(occ) => {
                let released = release_registration(coordinator, events, id, occ).await;
                with_retry(retry, || store.set_occurrence(id, None)).await?;
                Ok(ReconcileOutcome {
                    released,
                    ..Default::default()
                })
            }
            None => Ok(ReconcileOutcome::default()),
        };
    }

    match &stored.occurrence {
        Some(occ) if occ.state.is_in_flight() => Ok(ReconcileOutcome::default()),

        Some(occ)
            if matches!(
                occ.state,
                OccurrenceState::Acknowledged | OccurrenceState::Snoozed
            ) =>
        {
            // Crash window between the acknowledgment transition and the
            // atomic occurrence replacement: finish the job now.
            let released = release_registration(coordinator, events, id, occ).await;
            let next = match (occ.state, alarm.snooze.duration()) {
                (OccurrenceState::Snoozed, Some(duration))
                    if alarm.snooze.allows(occ.snooze_count) =>
                {
                    let fire_at = now
                        + chrono::Duration::from_std(duration).unwrap_or_default();
                    Some(OccurrenceRecord::snoozed(fire_at, occ.snooze_count + 1))
                }
                _ => compute_next(alarm, now)?.map(OccurrenceRecord::scheduled),
            };
            match next {
                Some(mut record) => {
                    record.registration = reserve_registration(
                        coordinator,
                        events,
                        id,
                        record.occurrence_id,
                        record.fire_at,
                    )
                    .await;
                    let reserved = record.registration.is_some();
                    with_retry(retry, || {
                        store.complete_occurrence(id, Some(record.clone()))
                    })
                    .await?;
                    events
                        .emit(Event::alarm_scheduled(
                            id.clone(),
                            record.occurrence_id,
                            record.fire_at,
                        ))
                        .await;
                    Ok(ReconcileOutcome {
                        reserved,
                        released,
                        due: None,
                    })
                }
                None => {
                    with_retry(retry, || store.complete_occurrence(id, None)).await?;
                    events.emit(Event::alarm_retired(id.clone())).await;
                    Ok(ReconcileOutcome {
                        released,
                        ..Default::default()
                    })
                }
            }
        }

        Some(occ) if occ.fire_at <= now => {
            // Missed while suspended or dead: fire late, never drop.
            Ok(ReconcileOutcome {
                due: Some(occ.occurrence_id),
                ..Default::default()
            })
        }

        Some(occ) => {
            // A snooze occurrence carries its own transient fire time; rule
            // recomputation only applies to ordinary occurrences.
            let desired = if occ.snooze_count > 0 {
                Some(occ.fire_at)
            } else {
                compute_next(alarm, now)?
            };

            match desired {
                Some(desired) if desired == occ.fire_at => {
                    // The stored token only counts if the OS still knows it;
                    // a reboot or consumed wake leaves it stale.
                    if let Some(registration) = occ.registration {
                        if coordinator.platform().is_registered(registration).await {
                            return Ok(ReconcileOutcome::default());
                        }
                    }
                    // Previously denied, lost, or stale registration: rearm.
                    let mut record = occ.clone();
                    record.registration =
                        reserve_registration(coordinator, events, id, record.occurrence_id, record.fire_at)
                            .await;
                    let reserved = record.registration.is_some();
                    with_retry(retry, || store.set_occurrence(id, Some(record.clone()))).await?;
                    Ok(ReconcileOutcome {
                        reserved,
                        ..Default::default()
                    })
                }
                Some(desired) => {
                    // Drift (clock change, timezone change, rule edit):
                    // replace the registration.
                    let released = release_registration(coordinator, events, id, occ).await;
                    let mut record = OccurrenceRecord::scheduled(desired);
                    record.registration =
                        reserve_registration(coordinator, events, id, record.occurrence_id, desired)
                            .await;
                    let reserved = record.registration.is_some();
                    with_retry(retry, || store.set_occurrence(id, Some(record.clone()))).await?;
                    events
                        .emit(Event::alarm_scheduled(id.clone(), record.occurrence_id, desired))
                        .await;
                    Ok(ReconcileOutcome {
                        reserved,
                        released,
                        due: None,
                    })
                }
                None => {
                    // Rule no longer yields an occurrence; drop the stale one.
                    let released = release_registration(coordinator, events, id, occ).await;
                    with_retry(retry, || store.set_occurrence(id, None)).await?;
                    Ok(ReconcileOutcome {
                        released,
                        ..Default::default()
                    })
                }
            }
        }

        None => match compute_next(alarm, now)? {
            Some(fire_at) => {
                let mut record = OccurrenceRecord::scheduled(fire_at);
                record.registration =
                    reserve_registration(coordinator, events, id, record.occurrence_id, fire_at)
                        .await;
                let reserved = record.registration.is_some();
                with_retry(retry, || store.set_occurrence(id, Some(record.clone()))).await?;
                events
                    .emit(Event::alarm_scheduled(id.clone(), record.occurrence_id, fire_at))
                    .await;
                Ok(ReconcileOutcome {
                    reserved,
                    ..Default::default()
                })
            }
            None => {
                // Enabled one-shot whose trigger passed without ever being
                // armed: the fire was missed entirely, deliver it late.
                let record = OccurrenceRecord::scheduled(alarm.trigger_time);
                let occurrence_id = record.occurrence_id;
                with_retry(retry, || store.set_occurrence(id, Some(record.clone()))).await?;
                Ok(ReconcileOutcome {
                    due: Some(occurrence_id),
                    ..Default::default()
                })
            }
        },
    }
}

/// Reserve the fallback timed wake for an occurrence.
///
/// A denial surfaces as a `SchedulingDenied` event, never an error: the
/// occurrence stays persisted with no registration and the next
/// reconciliation retries.
async fn reserve_registration<P: WakePlatform>(
    coordinator: &BudgetCoordinator<P>,
    events: &EventBus,
    alarm_id: &AlarmId,
    occurrence_id: OccurrenceId,
    fire_at: DateTime<Utc>,
) -> Option<RegistrationId> {
    let wake = WakeRequest {
        alarm_id: alarm_id.clone(),
        occurrence_id,
        fire_at,
    };
    match coordinator.reserve(wake).await {
        Ok(registration) => Some(registration),
        Err(e) => {
            tracing::warn!(alarm_id = %alarm_id, error = %e, "Wake registration denied");
            events
                .emit(Event::scheduling_denied(alarm_id.clone(), e.to_string()))
                .await;
            None
        }
    }
}

/// Release an occurrence's registration, if it has one.
async fn release_registration<P: WakePlatform>(
    coordinator: &BudgetCoordinator<P>,
    events: &EventBus,
    alarm_id: &AlarmId,
    occurrence: &OccurrenceRecord,
) -> bool {
    let Some(registration) = occurrence.registration else {
        return false;
    };
    coordinator.release(registration).await;
    events
        .emit(Event::registration_released(alarm_id.clone(), registration))
        .await;
    true
}
