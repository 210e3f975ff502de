//! Restart and degradation scenario tests.
//!
//! These simulate process termination, cold-start relaunch, OS-only
//! fallback wakes, and background budget exhaustion, using a SQLite store
//! shared across engine "generations".

use crate::common::{
    wait_for_delivery_count, wait_for_occurrence_state, wait_for_retired, RecordingEvents,
};
use chrono::{Duration as ChronoDuration, Utc};
use reveille::testing::{MockWakePlatform, RecordingAlertSink};
use reveille::{
    Alarm, AlarmEngine, AlarmStore, EngineConfig, EngineHandle, Event, EventBus, EventHandler,
    OccurrenceRecord, OccurrenceState, SnoozePolicy, SqliteStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

struct Generation {
    handle: EngineHandle,
    store: Arc<SqliteStore>,
    sink: Arc<RecordingAlertSink>,
    events: Arc<RecordingEvents>,
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        budget_check_interval: Duration::from_millis(30),
        ..EngineConfig::default()
    }
}

/// Start one engine "process" over a shared database and platform.
async fn launch(
    db_path: &Path,
    platform: Arc<MockWakePlatform>,
    config: EngineConfig,
) -> Generation {
    let store = Arc::new(SqliteStore::new(db_path).await.unwrap());
    let sink = Arc::new(RecordingAlertSink::new());
    let events = Arc::new(RecordingEvents::new());

    let bus = EventBus::new();
    bus.register(Arc::clone(&events) as Arc<dyn EventHandler>).await;

    let engine = AlarmEngine::with_shared(Arc::clone(&store), platform, Arc::clone(&sink))
        .with_config(config)
        .with_event_bus(bus);
    engine.register_background_capability();
    let (handle, _task) = engine.start().await;

    Generation {
        handle,
        store,
        sink,
        events,
    }
}

fn one_shot(id: &str, in_ms: i64) -> Alarm {
    Alarm::new(id, Utc::now() + ChronoDuration::milliseconds(in_ms))
        .with_snooze(SnoozePolicy::Disabled)
}

/// Test: after a device reboot (stale registration tokens), a cold-start
/// relaunch re-arms every pending alarm.
#[tokio::test]
async fn test_cold_start_rearms_after_reboot() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alarms.db");

    // First process: arm an alarm, then die.
    let platform1 = Arc::new(MockWakePlatform::new());
    let gen1 = launch(&db, Arc::clone(&platform1), fast_config()).await;
    gen1.handle
        .create_alarm(one_shot("morning", 3_600_000))
        .await
        .unwrap();
    gen1.handle.shutdown().await.unwrap();

    // Reboot: the OS forgot the registration, the store did not.
    let platform2 = Arc::new(MockWakePlatform::new());
    let gen2 = launch(&db, Arc::clone(&platform2), fast_config()).await;

    let stored = gen2.store.get(&"morning".into()).await.unwrap();
    assert!(stored.occurrence.is_some(), "occurrence must survive restart");

    let report = gen2.handle.on_launch(true).await.unwrap();
    assert_eq!(report.reserved, 1);
    assert!(platform2.wake_for(&"morning".into()).is_some());

    // A second launch hook changes nothing.
    let calls = platform2.total_calls();
    let report = gen2.handle.on_launch(false).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(platform2.total_calls(), calls);
}

/// Test: a one-shot alarm delivers via the fallback wake primitive alone
/// (no foreground relaunch, no refresh) and retires afterward.
#[tokio::test]
async fn test_fallback_wake_only_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alarms.db");

    // Registrations survive process death: the platform is shared.
    let platform = Arc::new(MockWakePlatform::new());

    let gen1 = launch(&db, Arc::clone(&platform), fast_config()).await;
    gen1.handle.create_alarm(one_shot("tea", 150)).await.unwrap();
    gen1.handle.shutdown().await.unwrap();
    assert_eq!(platform.reserved_count(), 1);

    // The OS re-launches the process in the background at fire time and
    // invokes only the wake callback.
    let gen2 = launch(&db, Arc::clone(&platform), fast_config()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let wake = platform.take_due().unwrap();
    gen2.handle.on_wake(wake.alarm_id, wake.occurrence_id).await;

    wait_for_delivery_count(&gen2.sink, 1, Duration::from_secs(2)).await;
    let stored = wait_for_occurrence_state(
        &*gen2.store,
        "tea",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    gen2.handle
        .dismiss("tea", stored.occurrence.unwrap().occurrence_id)
        .await
        .unwrap();

    wait_for_retired(&*gen2.store, "tea", Duration::from_secs(2)).await;
    assert_eq!(gen2.sink.started(), 1);
}

/// Test: a fire missed entirely while the process was dead is delivered
/// late on the next launch, not dropped.
#[tokio::test]
async fn test_missed_fire_delivers_late_on_launch() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alarms.db");

    // Seed the store as a previous process would have left it: an armed
    // occurrence whose fire time has already passed.
    {
        let store = SqliteStore::new(&db).await.unwrap();
        let alarm = one_shot("missed", -60_000);
        let fire_at = alarm.trigger_time;
        store.create(alarm).await.unwrap();
        store
            .set_occurrence(&"missed".into(), Some(OccurrenceRecord::scheduled(fire_at)))
            .await
            .unwrap();
        store.close().await;
    }

    let platform = Arc::new(MockWakePlatform::new());
    let gen = launch(&db, Arc::clone(&platform), fast_config()).await;
    let report = gen.handle.on_launch(true).await.unwrap();
    assert_eq!(report.due.len(), 1);

    wait_for_delivery_count(&gen.sink, 1, Duration::from_secs(2)).await;
    let stored = wait_for_occurrence_state(
        &*gen.store,
        "missed",
        OccurrenceState::Delivering,
        Duration::from_secs(2),
    )
    .await;
    gen.handle
        .dismiss("missed", stored.occurrence.unwrap().occurrence_id)
        .await
        .unwrap();
    wait_for_retired(&*gen.store, "missed", Duration::from_secs(2)).await;
}

/// Test: an acknowledgment interrupted before the next occurrence was
/// installed is finished by the launch reconciliation, neither dropping nor
/// double-firing the repeating alarm.
#[tokio::test]
async fn test_interrupted_acknowledgment_recovers_on_launch() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alarms.db");

    let anchor = Utc::now() - ChronoDuration::minutes(30);
    {
        let store = SqliteStore::new(&db).await.unwrap();
        let alarm = Alarm::new("r", anchor)
            .with_repeat(reveille::RepeatRule::interval(Duration::from_secs(3600)).unwrap());
        store.create(alarm).await.unwrap();
        // The crash happened after the acknowledgment transition but before
        // the next occurrence was written.
        store
            .set_occurrence(
                &"r".into(),
                Some(OccurrenceRecord {
                    occurrence_id: reveille::OccurrenceId::new(),
                    state: OccurrenceState::Acknowledged,
                    fire_at: anchor,
                    snooze_count: 0,
                    registration: None,
                }),
            )
            .await
            .unwrap();
        store.close().await;
    }

    let platform = Arc::new(MockWakePlatform::new());
    let gen = launch(&db, Arc::clone(&platform), fast_config()).await;
    let report = gen.handle.on_launch(true).await.unwrap();
    assert_eq!(report.reserved, 1);
    assert!(report.due.is_empty());

    let stored = gen.store.get(&"r".into()).await.unwrap();
    assert!(stored.alarm.enabled);
    let occ = stored.occurrence.unwrap();
    assert_eq!(occ.state, OccurrenceState::Scheduled);
    assert_eq!(occ.fire_at, anchor + ChronoDuration::hours(1));
    assert!(occ.registration.is_some());
    assert_eq!(gen.sink.started(), 0);
}

/// Test: budget renewal denial degrades to the fallback wake with a warning
/// event; the registration is untouched and nothing crashes.
#[tokio::test]
async fn test_budget_exhaustion_degrades_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alarms.db");

    let platform = Arc::new(MockWakePlatform::new());
    platform.deny_extensions(true);

    let config = EngineConfig {
        initial_budget: Duration::from_millis(1),
        budget_check_interval: Duration::from_millis(30),
        ..EngineConfig::default()
    };
    let gen = launch(&db, Arc::clone(&platform), config).await;
    gen.handle
        .create_alarm(one_shot("far", 3_600_000))
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    loop {
        let warnings = gen
            .events
            .count_matching(|e| matches!(e, Event::BudgetWarning { .. }))
            .await;
        if warnings >= 1 {
            break;
        }
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "no budget warning observed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Degraded, not broken: the fallback registration is still armed.
    assert_eq!(platform.reserved_count(), 1);
    assert!(gen.handle.is_running().await);
}
