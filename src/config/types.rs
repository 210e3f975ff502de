//! Configuration type definitions.
//!
//! [`EngineConfig`] carries the engine's policy knobs (delivery tolerance,
//! snooze defaults, budget renewal) and the host file types describe alarms
//! declared in YAML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::backoff::WriteRetry;
use crate::core::repeat::serde_duration;

/// Engine policy configuration.
///
/// The on-time tolerance window and the snooze defaults are deliberately
/// configuration rather than constants; tests parameterize over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How early a wake callback may arrive and still count as on time.
    /// Earlier wakes are re-armed instead of delivered.
    #[serde(with = "serde_duration")]
    pub tolerance: Duration,

    /// Snooze duration used when an alarm does not specify one.
    #[serde(with = "serde_duration")]
    pub default_snooze: Duration,

    /// Snooze count cap used when an alarm does not specify one.
    pub default_snooze_max: u32,

    /// Safety cutoff: a delivery never renders longer than this.
    #[serde(with = "serde_duration")]
    pub delivery_cutoff: Duration,

    /// Budget assumed granted at launch, before any renewal.
    #[serde(with = "serde_duration")]
    pub initial_budget: Duration,

    /// Renew the execution window when the next fire time is within this
    /// margin of the remaining budget.
    #[serde(with = "serde_duration")]
    pub renewal_margin: Duration,

    /// How often the engine checks whether the budget needs renewal.
    #[serde(with = "serde_duration")]
    pub budget_check_interval: Duration,

    /// Retry policy for durable store writes.
    pub write_retry: WriteRetry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_secs(30),
            default_snooze: Duration::from_secs(9 * 60),
            default_snooze_max: 3,
            delivery_cutoff: Duration::from_secs(10 * 60),
            initial_budget: Duration::from_secs(30),
            renewal_margin: Duration::from_secs(30),
            budget_check_interval: Duration::from_secs(10),
            write_retry: WriteRetry::default(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (non-persistent).
    #[default]
    Memory,
    /// SQLite storage.
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Root of a host configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Engine policy overrides.
    pub engine: EngineConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Declared alarms.
    pub alarms: Vec<AlarmSpec>,
}

/// One alarm as declared in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSpec {
    /// Alarm identifier.
    pub id: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Either a full RFC 3339 instant or a wall-clock time like "07:00".
    pub time: String,
    /// IANA timezone for wall-clock times and weekday repeats.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Weekdays to repeat on ("mon".."sun"). Mutually exclusive with `every`.
    #[serde(default)]
    pub weekdays: Vec<String>,
    /// Repeat interval like "4h" or "90m". Mutually exclusive with `weekdays`.
    pub every: Option<String>,
    /// Sound profile overrides.
    #[serde(default)]
    pub sound: Option<SoundSpec>,
    /// Snooze policy overrides.
    #[serde(default)]
    pub snooze: Option<SnoozeSpec>,
    /// Whether the alarm is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Sound profile as declared in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundSpec {
    /// Sound asset identifier.
    pub asset: Option<String>,
    /// Fade-in ramp in seconds.
    pub fade_in: Option<u64>,
    /// Target volume in `0.0..=1.0`.
    pub volume: Option<f32>,
    /// Whether the sound loops until stopped.
    #[serde(rename = "loop")]
    pub loop_audio: Option<bool>,
    /// Whether to vibrate alongside the sound.
    pub vibrate: Option<bool>,
}

/// Snooze policy as declared in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeSpec {
    /// Set to false to disable snoozing entirely.
    pub enabled: Option<bool>,
    /// Maximum number of snoozes.
    pub max_count: Option<u32>,
    /// Snooze duration in seconds.
    pub duration: Option<u64>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}
