//! Common test utilities shared across integration tests.

use reveille::testing::{MockWakePlatform, RecordingAlertSink};
use reveille::{
    AlarmEngine, AlarmStore, EngineConfig, EngineHandle, Event, EventBus, EventHandler,
    MemoryStore, OccurrenceState, StoredAlarm,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A started engine over mock platform and sink, with every component
/// reachable for assertions.
pub struct TestEngine {
    pub handle: EngineHandle,
    pub store: Arc<MemoryStore>,
    pub platform: Arc<MockWakePlatform>,
    pub sink: Arc<RecordingAlertSink>,
    pub events: Arc<RecordingEvents>,
}

/// Engine config tuned for fast tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        tolerance: Duration::from_secs(30),
        delivery_cutoff: Duration::from_secs(5),
        budget_check_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

/// Start an engine with the given config over fresh mocks.
pub async fn start_engine(config: EngineConfig) -> TestEngine {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MockWakePlatform::new());
    let sink = Arc::new(RecordingAlertSink::new());
    let events = Arc::new(RecordingEvents::new());

    let bus = EventBus::new();
    bus.register(Arc::clone(&events) as Arc<dyn EventHandler>).await;

    let engine = AlarmEngine::with_shared(
        Arc::clone(&store),
        Arc::clone(&platform),
        Arc::clone(&sink),
    )
    .with_config(config)
    .with_event_bus(bus);

    let (handle, _engine_task) = engine.start().await;

    TestEngine {
        handle,
        store,
        platform,
        sink,
        events,
    }
}

/// Event handler that records every event for later assertions.
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn count_matching(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEvents {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Wait for an alarm's occurrence to reach an expected state, polling the
/// store.
///
/// More reliable than fixed sleeps since engine commands are processed
/// asynchronously. Polls every 10ms and panics on timeout.
pub async fn wait_for_occurrence_state<S: AlarmStore>(
    store: &S,
    id: &str,
    expected: OccurrenceState,
    timeout: Duration,
) -> StoredAlarm {
    let start = tokio::time::Instant::now();
    loop {
        let stored = store.get(&id.into()).await.unwrap();
        if stored.occurrence.as_ref().map(|occ| occ.state) == Some(expected) {
            return stored;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for alarm {} to reach {:?}, current occurrence: {:?}",
                id, expected, stored.occurrence
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until an alarm has been retired (disabled, occurrence cleared).
pub async fn wait_for_retired<S: AlarmStore>(store: &S, id: &str, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let stored = store.get(&id.into()).await.unwrap();
        if !stored.alarm.enabled && stored.occurrence.is_none() {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for alarm {} to retire, current: enabled={} occurrence={:?}",
                id, stored.alarm.enabled, stored.occurrence
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the sink has started `expected` deliveries.
pub async fn wait_for_delivery_count(
    sink: &RecordingAlertSink,
    expected: u32,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        if sink.started() >= expected {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} deliveries, saw {}",
                expected,
                sink.started()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
