//! Trigger-to-delivery lifecycle integration tests.

use crate::common::{
    start_engine, test_config, wait_for_delivery_count, wait_for_occurrence_state,
    wait_for_retired,
};
use chrono::{Duration as ChronoDuration, Utc};
use reveille::{Alarm, DeliveryOutcome, Event, OccurrenceState, RepeatRule, SnoozePolicy};
use std::time::Duration;

fn one_shot(id: &str, in_secs: i64) -> Alarm {
    Alarm::new(id, Utc::now() + ChronoDuration::seconds(in_secs))
        .with_snooze(SnoozePolicy::Disabled)
}

/// Test: an enabled one-shot alarm delivers exactly once and retires after
/// dismissal.
#[tokio::test]
async fn test_one_shot_delivers_once_and_retires() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 2)).await.unwrap();
    let wake = t.platform.wake_for(&"a".into()).unwrap();

    // The OS invokes the wake callback.
    t.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;
    wait_for_delivery_count(&t.sink, 1, Duration::from_secs(2)).await;

    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    let occurrence_id = stored.occurrence.unwrap().occurrence_id;

    t.handle.dismiss("a", occurrence_id).await.unwrap();
    wait_for_retired(&*t.store, "a", Duration::from_secs(2)).await;

    assert_eq!(t.sink.started(), 1);
    assert_eq!(t.sink.stopped(), 1);
    assert_eq!(
        t.events
            .count_matching(|e| matches!(e, Event::AlarmRetired { .. }))
            .await,
        1
    );
}

/// Test: duplicate wake callbacks for the same occurrence never produce two
/// deliveries.
#[tokio::test]
async fn test_duplicate_wakes_deliver_once() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 2)).await.unwrap();
    let wake = t.platform.wake_for(&"a".into()).unwrap();

    // A launch rearm and a stale wake arriving together.
    for _ in 0..3 {
        t.handle
            .on_wake(wake.alarm_id.clone(), wake.occurrence_id)
            .await;
    }
    wait_for_delivery_count(&t.sink, 1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(t.sink.started(), 1);
    assert_eq!(
        t.events
            .count_matching(|e| matches!(e, Event::DeliveryStarted { .. }))
            .await,
        1
    );
}

/// Test: the safety cutoff acknowledges an unanswered delivery (implicit
/// stop).
#[tokio::test]
async fn test_cutoff_is_implicit_stop() {
    let mut config = test_config();
    config.delivery_cutoff = Duration::from_millis(80);
    let t = start_engine(config).await;

    t.handle.create_alarm(one_shot("a", 2)).await.unwrap();
    let wake = t.platform.wake_for(&"a".into()).unwrap();
    t.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;

    wait_for_retired(&*t.store, "a", Duration::from_secs(2)).await;

    assert_eq!(t.sink.started(), 1);
    assert_eq!(t.sink.stopped(), 1);
    assert_eq!(
        t.events
            .count_matching(|e| matches!(
                e,
                Event::DeliveryFinished {
                    outcome: DeliveryOutcome::TimedOut,
                    ..
                }
            ))
            .await,
        1
    );
}

/// Test: a repeating alarm reschedules to the next rule occurrence after
/// dismissal, phase-aligned with its anchor.
#[tokio::test]
async fn test_repeating_alarm_reschedules_after_dismiss() {
    let t = start_engine(test_config()).await;

    let anchor = Utc::now() - ChronoDuration::milliseconds(100);
    let alarm = Alarm::new("r", anchor)
        .with_repeat(RepeatRule::interval(Duration::from_millis(300)).unwrap())
        .with_snooze(SnoozePolicy::Disabled);
    t.handle.create_alarm(alarm).await.unwrap();

    let wake = t.platform.wake_for(&"r".into()).unwrap();
    let first_fire = wake.fire_at;
    assert!(first_fire > anchor);

    // Wait until the fire time passes, then play the OS callback.
    let delay = (first_fire - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(delay + Duration::from_millis(50)).await;
    t.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;
    wait_for_delivery_count(&t.sink, 1, Duration::from_secs(2)).await;

    let stored = wait_for_occurrence_state(
        &*t.store,
        "r",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    t.handle
        .dismiss("r", stored.occurrence.unwrap().occurrence_id)
        .await
        .unwrap();

    let stored = wait_for_occurrence_state(
        &*t.store,
        "r",
        OccurrenceState::Scheduled,
        Duration::from_secs(2),
    )
    .await;
    let occ = stored.occurrence.unwrap();

    assert!(stored.alarm.enabled);
    assert!(occ.fire_at > first_fire);
    // Phase-aligned with the anchor.
    let offset_ms = (occ.fire_at - anchor).num_milliseconds();
    assert_eq!(offset_ms % 300, 0);
    assert!(occ.registration.is_some());
    assert!(t.platform.wake_for(&"r".into()).is_some());
}

/// Test: deleting an alarm mid-delivery lets the delivery complete but
/// prevents rescheduling.
#[tokio::test]
async fn test_delete_during_delivery_completes_without_reschedule() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 2)).await.unwrap();
    let wake = t.platform.wake_for(&"a".into()).unwrap();
    t.handle
        .on_wake(wake.alarm_id.clone(), wake.occurrence_id)
        .await;
    wait_for_delivery_count(&t.sink, 1, Duration::from_secs(2)).await;

    t.handle.delete_alarm("a").await.unwrap();

    // The in-flight delivery can still be acknowledged.
    t.handle.dismiss("a", wake.occurrence_id).await.unwrap();

    let start = tokio::time::Instant::now();
    while t.sink.stopped() < 1 {
        assert!(start.elapsed() < Duration::from_secs(2), "delivery never stopped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(t.handle.get_alarm("a").await.is_err());
    assert_eq!(t.platform.reserved_count(), 0);
}

/// Test: a wake arriving earlier than the tolerance window re-arms instead
/// of delivering.
#[tokio::test]
async fn test_early_wake_rearms_instead_of_delivering() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();
    let wake = t.platform.wake_for(&"a".into()).unwrap();

    t.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(t.sink.started(), 0);
    let stored = t.handle.get_alarm("a").await.unwrap();
    let occ = stored.occurrence.unwrap();
    assert_eq!(occ.state, OccurrenceState::Scheduled);
    assert!(occ.registration.is_some());
    // The original registration was replaced, not leaked.
    assert_eq!(t.platform.reserve_calls(), 2);
    assert_eq!(t.platform.reserved_count(), 1);
}

/// Test: dismissing when nothing is delivering is an error, not a crash.
#[tokio::test]
async fn test_dismiss_without_delivery_is_rejected() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();
    let stored = t.handle.get_alarm("a").await.unwrap();
    let occurrence_id = stored.occurrence.unwrap().occurrence_id;

    let result = t.handle.dismiss("a", occurrence_id).await;
    assert!(result.is_err());
}
