//! Core alarm types: identifiers, definitions, repeat rules, retry policy.

pub mod alarm;
pub mod backoff;
pub mod repeat;
pub mod types;

pub use alarm::{Alarm, SnoozePolicy, SoundProfile};
pub use backoff::WriteRetry;
pub use repeat::{parse_duration, parse_weekday, RepeatError, RepeatRule};
pub use types::{AlarmId, OccurrenceId, RegistrationId};
