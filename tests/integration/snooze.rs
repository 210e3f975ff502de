//! Snooze policy integration tests.

use crate::common::{
    start_engine, test_config, wait_for_delivery_count, wait_for_occurrence_state,
    wait_for_retired,
};
use chrono::{Duration as ChronoDuration, Utc};
use reveille::{Alarm, Event, OccurrenceState, SnoozePolicy};
use std::time::Duration;

fn snoozable(id: &str, max_count: u32, snooze: Duration) -> Alarm {
    Alarm::new(id, Utc::now() + ChronoDuration::seconds(2))
        .with_snooze(SnoozePolicy::limited(max_count, snooze))
}

/// Consume the earliest pending wake (as the OS would) and wait for its
/// delivery to start.
async fn deliver(t: &crate::common::TestEngine, id: &str, expected_deliveries: u32) {
    let wake = t.platform.take_due().expect("no pending wake");
    assert_eq!(wake.alarm_id.as_str(), id);
    t.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;
    wait_for_delivery_count(&t.sink, expected_deliveries, Duration::from_secs(2)).await;
}

/// Test: snoozing installs a transient occurrence at ack time plus the
/// snooze duration, without touching the alarm's rule.
#[tokio::test]
async fn test_snooze_schedules_transient_occurrence() {
    let t = start_engine(test_config()).await;
    let snooze_duration = Duration::from_secs(60);

    let alarm = snoozable("a", 3, snooze_duration);
    let trigger_time = alarm.trigger_time;
    t.handle.create_alarm(alarm).await.unwrap();
    deliver(&t, "a", 1).await;

    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    let delivering_id = stored.occurrence.unwrap().occurrence_id;

    let ack_time = Utc::now();
    t.handle.snooze("a", delivering_id).await.unwrap();

    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Scheduled,
        Duration::from_secs(2),
    )
    .await;
    let occ = stored.occurrence.unwrap();

    assert_ne!(occ.occurrence_id, delivering_id);
    assert_eq!(occ.snooze_count, 1);
    assert!(occ.registration.is_some());

    // fire_at = ack time + snooze duration (small processing slack).
    let offset = occ.fire_at - ack_time;
    assert!(offset >= ChronoDuration::seconds(59));
    assert!(offset <= ChronoDuration::seconds(61));

    // The underlying rule is untouched.
    assert_eq!(stored.alarm.trigger_time, trigger_time);
    assert_eq!(
        t.events
            .count_matching(|e| matches!(e, Event::AlarmSnoozed { count: 1, .. }))
            .await,
        1
    );
}

/// Test: snoozing N times within the cap succeeds each time; the (N+1)-th
/// attempt falls back to acknowledgment semantics.
#[tokio::test]
async fn test_snooze_cap_falls_back_to_dismiss() {
    let t = start_engine(test_config()).await;
    let snooze_duration = Duration::from_millis(100);

    t.handle
        .create_alarm(snoozable("a", 2, snooze_duration))
        .await
        .unwrap();

    for round in 1..=2u32 {
        deliver(&t, "a", round).await;
        let stored = wait_for_occurrence_state(
            &*t.store,
            "a",
            OccurrenceState::Delivering,
            Duration::from_secs(2),
        )
        .await;
        let occ = stored.occurrence.unwrap();
        t.handle.snooze("a", occ.occurrence_id).await.unwrap();

        let stored = wait_for_occurrence_state(
            &*t.store,
            "a",
            OccurrenceState::Scheduled,
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(stored.occurrence.unwrap().snooze_count, round);

        // Wait out the snooze so the next wake is due.
        tokio::time::sleep(snooze_duration + Duration::from_millis(50)).await;
    }

    // Third snooze attempt: cap exhausted, acts as a dismissal and retires
    // the one-shot.
    deliver(&t, "a", 3).await;
    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    let occ = stored.occurrence.unwrap();
    assert_eq!(occ.snooze_count, 2);
    t.handle.snooze("a", occ.occurrence_id).await.unwrap();

    wait_for_retired(&*t.store, "a", Duration::from_secs(2)).await;
    assert_eq!(t.sink.started(), 3);
}

/// Test: a snooze request on a snooze-disabled alarm acts as a dismissal.
#[tokio::test]
async fn test_snooze_disabled_acts_as_dismiss() {
    let t = start_engine(test_config()).await;

    let alarm = Alarm::new("a", Utc::now() + ChronoDuration::seconds(2))
        .with_snooze(SnoozePolicy::Disabled);
    t.handle.create_alarm(alarm).await.unwrap();
    deliver(&t, "a", 1).await;

    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    t.handle
        .snooze("a", stored.occurrence.unwrap().occurrence_id)
        .await
        .unwrap();

    wait_for_retired(&*t.store, "a", Duration::from_secs(2)).await;
    assert_eq!(
        t.events
            .count_matching(|e| matches!(e, Event::AlarmSnoozed { .. }))
            .await,
        0
    );
}

/// Test: the snooze wake delivers again after the snooze duration.
#[tokio::test]
async fn test_snooze_wake_delivers_again() {
    let t = start_engine(test_config()).await;

    t.handle
        .create_alarm(snoozable("a", 3, Duration::from_millis(100)))
        .await
        .unwrap();
    deliver(&t, "a", 1).await;

    let stored = wait_for_occurrence_state(
        &*t.store,
        "a",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    t.handle
        .snooze("a", stored.occurrence.unwrap().occurrence_id)
        .await
        .unwrap();

    wait_for_occurrence_state(&*t.store, "a", OccurrenceState::Scheduled, Duration::from_secs(2))
        .await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Second delivery from the snooze occurrence.
    deliver(&t, "a", 2).await;
    assert_eq!(t.sink.started(), 2);
}
