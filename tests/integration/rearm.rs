//! Registration reconciliation integration tests.
//!
//! Tests that verify `rearm_all` keeps the store and platform registrations
//! converged, without redundant platform calls.

use crate::common::{start_engine, test_config};
use chrono::{Duration as ChronoDuration, Utc};
use reveille::{compute_next, Alarm, Event, RepeatRule, SnoozePolicy};

fn one_shot(id: &str, in_secs: i64) -> Alarm {
    Alarm::new(id, Utc::now() + ChronoDuration::seconds(in_secs))
        .with_snooze(SnoozePolicy::Disabled)
}

/// Test: creating an alarm arms exactly one registration.
#[tokio::test]
async fn test_create_reserves_one_registration() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();

    assert_eq!(t.platform.reserved_count(), 1);
    let wake = t.platform.wake_for(&"a".into()).unwrap();
    let stored = t.handle.get_alarm("a").await.unwrap();
    assert_eq!(wake.fire_at, stored.occurrence.unwrap().fire_at);
}

/// Test: rearm is idempotent; consecutive refreshes with no state change
/// perform zero platform calls.
#[tokio::test]
async fn test_rearm_is_idempotent() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();
    t.handle.create_alarm(one_shot("b", 7200)).await.unwrap();

    let calls_before = t.platform.total_calls();
    let report = t.handle.refresh().await.unwrap();
    assert_eq!(report.reserved, 0);
    assert_eq!(report.released, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(t.platform.total_calls(), calls_before);

    let report = t.handle.refresh().await.unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(t.platform.total_calls(), calls_before);
}

/// Test: deleting an alarm releases its registration, and a subsequent
/// rearm does not recreate it.
#[tokio::test]
async fn test_delete_releases_and_rearm_does_not_recreate() {
    let t = start_engine(test_config()).await;

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();
    assert_eq!(t.platform.reserved_count(), 1);

    t.handle.delete_alarm("a").await.unwrap();
    assert_eq!(t.platform.reserved_count(), 0);

    let report = t.handle.refresh().await.unwrap();
    assert_eq!(report.reserved, 0);
    assert_eq!(t.platform.reserved_count(), 0);
}

/// Test: disabling an alarm releases its registration but keeps the record.
#[tokio::test]
async fn test_disable_releases_registration() {
    let t = start_engine(test_config()).await;

    let alarm = one_shot("a", 3600);
    t.handle.create_alarm(alarm.clone()).await.unwrap();
    assert_eq!(t.platform.reserved_count(), 1);

    t.handle
        .update_alarm(alarm.with_enabled(false))
        .await
        .unwrap();

    assert_eq!(t.platform.reserved_count(), 0);
    let stored = t.handle.get_alarm("a").await.unwrap();
    assert!(!stored.alarm.enabled);
    assert!(stored.occurrence.is_none());
}

/// Test: changing the trigger time replaces the registration with one at
/// the new instant.
#[tokio::test]
async fn test_trigger_change_replaces_registration() {
    let t = start_engine(test_config()).await;

    let alarm = one_shot("a", 3600);
    t.handle.create_alarm(alarm.clone()).await.unwrap();
    let old_fire = t.platform.wake_for(&"a".into()).unwrap().fire_at;

    let new_trigger = Utc::now() + ChronoDuration::seconds(7200);
    let mut moved = alarm;
    moved.trigger_time = new_trigger;
    t.handle.update_alarm(moved).await.unwrap();

    assert_eq!(t.platform.reserved_count(), 1);
    let wake = t.platform.wake_for(&"a".into()).unwrap();
    assert_eq!(wake.fire_at, new_trigger);
    assert_ne!(wake.fire_at, old_fire);
}

/// Test: a weekday repeat is armed at exactly the instant the pure
/// computation predicts.
#[tokio::test]
async fn test_weekday_registration_matches_computed_next() {
    let t = start_engine(test_config()).await;

    let all_days = [
        chrono::Weekday::Mon,
        chrono::Weekday::Tue,
        chrono::Weekday::Wed,
        chrono::Weekday::Thu,
        chrono::Weekday::Fri,
        chrono::Weekday::Sat,
        chrono::Weekday::Sun,
    ];
    // Anchored a week ago, so the next fire is the recomputed wall time,
    // not the anchor itself.
    let anchor = Utc::now() - ChronoDuration::days(7) + ChronoDuration::minutes(10);
    let alarm = Alarm::new("w", anchor)
        .with_repeat(RepeatRule::weekdays(all_days, "UTC").unwrap());

    let now = Utc::now();
    let expected = compute_next(&alarm, now).unwrap().unwrap();
    assert!(expected > now);

    t.handle.create_alarm(alarm).await.unwrap();
    let wake = t.platform.wake_for(&"w".into()).unwrap();
    assert_eq!(wake.fire_at, expected);
}

/// Test: a denied registration keeps the occurrence persisted, surfaces a
/// warning event, and is retried by the next rearm.
#[tokio::test]
async fn test_denied_registration_warns_and_retries() {
    let t = start_engine(test_config()).await;
    t.platform.deny_reservations(true);

    t.handle.create_alarm(one_shot("a", 3600)).await.unwrap();

    // The alarm is persisted and armed logically, with no registration.
    let stored = t.handle.get_alarm("a").await.unwrap();
    let occ = stored.occurrence.unwrap();
    assert!(occ.registration.is_none());
    assert_eq!(t.platform.reserved_count(), 0);
    assert_eq!(
        t.events
            .count_matching(|e| matches!(e, Event::SchedulingDenied { .. }))
            .await,
        1
    );

    // Permission restored: the next reconciliation heals the registration.
    t.platform.deny_reservations(false);
    let report = t.handle.refresh().await.unwrap();
    assert_eq!(report.reserved, 1);
    assert!(t.platform.wake_for(&"a".into()).is_some());
}
