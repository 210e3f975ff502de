//! reveille - an alarm scheduling and delivery engine.
//!
//! Guarantees that a user-defined alarm fires an audible/visible alert at
//! (or within strict tolerance of) its wall-clock time, even though the
//! hosting process may be suspended, terminated, or the device rebooted
//! between arming and firing. Alarm definitions persist durably; every
//! execution opportunity re-arms the pending schedule; deliveries loop and
//! fade per their sound profile until dismissed, snoozed, or cut off.

pub mod config;
pub mod core;
pub mod delivery;
pub mod events;
pub mod platform;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{EngineConfig, HostConfig, StorageConfig};
pub use crate::core::{
    Alarm, AlarmId, OccurrenceId, RegistrationId, RepeatRule, SnoozePolicy, SoundProfile,
    WriteRetry,
};
pub use delivery::{AlertSink, DeliveryOutcome, LogAlertSink};
pub use events::{Event, EventBus, EventHandler};
pub use platform::{
    BackgroundCapability, BudgetCoordinator, LocalWakePlatform, PlatformError, WakePlatform,
    WakeRequest,
};
pub use scheduler::{
    compute_next, AlarmEngine, EngineError, EngineHandle, EngineState, LogHandler, RearmReport,
    UserAction,
};
pub use storage::{AlarmStore, MemoryStore, OccurrenceRecord, OccurrenceState, StoreError, StoredAlarm};
#[cfg(any(feature = "sqlite", test))]
pub use storage::SqliteStore;
