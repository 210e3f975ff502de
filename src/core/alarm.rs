//! Alarm definitions: the durable user intent.
//!
//! An [`Alarm`] records when to fire, how to repeat, what to play, and the
//! snooze allowance. Occurrence state (the live scheduled instance) is kept
//! separately by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::repeat::{serde_duration, RepeatRule};
use super::types::AlarmId;

/// Sound rendering profile for an alarm's delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundProfile {
    /// Identifier of the sound asset to render.
    pub asset: String,
    /// Ramp duration from silence to the target volume.
    #[serde(with = "serde_duration")]
    pub fade_in: Duration,
    /// Target volume in `0.0..=1.0`.
    pub volume: f32,
    /// Whether the sound loops until stopped.
    pub loop_audio: bool,
    /// Whether to vibrate alongside the sound.
    pub vibrate: bool,
}

impl SoundProfile {
    /// Create a profile for the named asset with full volume and looping.
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            fade_in: Duration::ZERO,
            volume: 1.0,
            loop_audio: true,
            vibrate: true,
        }
    }

    /// Set the fade-in ramp duration.
    pub fn with_fade_in(mut self, fade_in: Duration) -> Self {
        self.fade_in = fade_in;
        self
    }

    /// Set the target volume (clamped to `0.0..=1.0`).
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Set the loop policy.
    pub fn with_loop(mut self, loop_audio: bool) -> Self {
        self.loop_audio = loop_audio;
        self
    }

    /// Set the vibration policy.
    pub fn with_vibrate(mut self, vibrate: bool) -> Self {
        self.vibrate = vibrate;
        self
    }
}

impl Default for SoundProfile {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Snooze allowance for an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnoozePolicy {
    /// Snoozing is not allowed; a snooze request acts as a dismissal.
    Disabled,
    /// Up to `max_count` snoozes of `duration` each.
    Limited {
        max_count: u32,
        #[serde(with = "serde_duration")]
        duration: Duration,
    },
}

impl SnoozePolicy {
    /// Create a limited policy.
    pub fn limited(max_count: u32, duration: Duration) -> Self {
        SnoozePolicy::Limited {
            max_count,
            duration,
        }
    }

    /// Whether another snooze is allowed after `used` snoozes.
    pub fn allows(&self, used: u32) -> bool {
        match self {
            SnoozePolicy::Disabled => false,
            SnoozePolicy::Limited { max_count, .. } => used < *max_count,
        }
    }

    /// The snooze duration, if snoozing is enabled.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            SnoozePolicy::Disabled => None,
            SnoozePolicy::Limited { duration, .. } => Some(*duration),
        }
    }
}

impl Default for SnoozePolicy {
    /// Default policy: three snoozes of nine minutes each.
    fn default() -> Self {
        SnoozePolicy::Limited {
            max_count: 3,
            duration: Duration::from_secs(9 * 60),
        }
    }
}

/// A durable alarm definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// Unique alarm identifier.
    pub id: AlarmId,
    /// Human-readable label shown with the notification.
    pub label: String,
    /// Absolute instant of the first intended fire.
    pub trigger_time: DateTime<Utc>,
    /// How the trigger is recomputed after firing.
    pub repeat: RepeatRule,
    /// Sound rendering profile.
    pub sound: SoundProfile,
    /// Snooze allowance.
    pub snooze: SnoozePolicy,
    /// Disabled alarms are retained but never scheduled.
    pub enabled: bool,
    /// When the alarm was created.
    pub created_at: DateTime<Utc>,
    /// When the alarm was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// Create a new enabled one-shot alarm.
    pub fn new(id: impl Into<AlarmId>, trigger_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            label: String::new(),
            trigger_time,
            repeat: RepeatRule::Once,
            sound: SoundProfile::default(),
            snooze: SnoozePolicy::default(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the repeat rule.
    pub fn with_repeat(mut self, repeat: RepeatRule) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the sound profile.
    pub fn with_sound(mut self, sound: SoundProfile) -> Self {
        self.sound = sound;
        self
    }

    /// Set the snooze policy.
    pub fn with_snooze(mut self, snooze: SnoozePolicy) -> Self {
        self.snooze = snooze;
        self
    }

    /// Set enabled status.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the alarm repeats after firing.
    pub fn is_repeating(&self) -> bool {
        self.repeat.is_repeating()
    }
}
