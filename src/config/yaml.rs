//! YAML loading and alarm construction.
//!
//! Turns a [`HostConfig`] document into validated [`Alarm`] values. Times
//! may be given as full RFC 3339 instants or as wall-clock times ("07:00")
//! resolved against the declared timezone.

use chrono::{DateTime, Days, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use super::types::{AlarmSpec, EngineConfig, HostConfig};
use crate::core::repeat::{parse_duration, parse_weekday};
use crate::core::{Alarm, RepeatRule, SnoozePolicy, SoundProfile};

/// Load a host configuration file.
pub fn load_host_config(path: impl AsRef<Path>) -> Result<HostConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_host_config(&contents)
}

/// Parse a host configuration document.
pub fn parse_host_config(contents: &str) -> Result<HostConfig, ConfigError> {
    let config: HostConfig = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Build and validate all alarms declared in a host configuration.
pub fn build_alarms(config: &HostConfig, now: DateTime<Utc>) -> Result<Vec<Alarm>, ConfigError> {
    let mut seen = HashSet::new();
    let mut alarms = Vec::with_capacity(config.alarms.len());

    for spec in &config.alarms {
        if !seen.insert(spec.id.clone()) {
            return Err(ConfigError::DuplicateAlarmId(spec.id.clone()));
        }
        alarms.push(build_alarm(spec, &config.engine, now)?);
    }

    Ok(alarms)
}

/// Build a single alarm from its YAML declaration.
pub fn build_alarm(
    spec: &AlarmSpec,
    defaults: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Alarm, ConfigError> {
    if spec.id.trim().is_empty() {
        return Err(ConfigError::invalid(&spec.id, "id must not be empty"));
    }

    let tz: Tz = spec
        .timezone
        .parse()
        .map_err(|_| ConfigError::invalid(&spec.id, format!("unknown timezone: {}", spec.timezone)))?;

    let trigger_time = resolve_time(spec, tz, now)?;
    let repeat = resolve_repeat(spec)?;

    if repeat == RepeatRule::Once && trigger_time <= now {
        return Err(ConfigError::invalid(
            &spec.id,
            format!("one-shot trigger time {} is in the past", trigger_time),
        ));
    }

    let sound = resolve_sound(spec)?;
    let snooze = resolve_snooze(spec, defaults);

    Ok(Alarm::new(spec.id.as_str(), trigger_time)
        .with_label(spec.label.clone())
        .with_repeat(repeat)
        .with_sound(sound)
        .with_snooze(snooze)
        .with_enabled(spec.enabled))
}

/// Resolve the `time` field: RFC 3339 instant, or wall-clock in `timezone`
/// (the next upcoming instant with that wall time).
fn resolve_time(spec: &AlarmSpec, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(&spec.time) {
        return Ok(instant.with_timezone(&Utc));
    }

    let wall = NaiveTime::parse_from_str(&spec.time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&spec.time, "%H:%M"))
        .map_err(|_| {
            ConfigError::invalid(
                &spec.id,
                format!("time must be RFC 3339 or HH:MM, got {:?}", spec.time),
            )
        })?;

    let local_now = now.with_timezone(&tz);
    for offset in 0..=1u64 {
        let date = local_now
            .date_naive()
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| ConfigError::invalid(&spec.id, "time out of range"))?;
        let candidate = match tz.from_local_datetime(&date.and_time(wall)) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => None,
        };
        if let Some(candidate) = candidate {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return Ok(candidate);
            }
        }
    }

    Err(ConfigError::invalid(
        &spec.id,
        format!("could not resolve wall time {:?} in {}", spec.time, spec.timezone),
    ))
}

fn resolve_repeat(spec: &AlarmSpec) -> Result<RepeatRule, ConfigError> {
    match (&spec.every, spec.weekdays.is_empty()) {
        (Some(_), false) => Err(ConfigError::invalid(
            &spec.id,
            "`every` and `weekdays` are mutually exclusive",
        )),
        (Some(every), true) => {
            let interval = parse_duration(every)?;
            Ok(RepeatRule::interval(interval)?)
        }
        (None, false) => {
            let days = spec
                .weekdays
                .iter()
                .map(|d| {
                    parse_weekday(d).map_err(|_| {
                        ConfigError::invalid(&spec.id, format!("unknown weekday: {}", d))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RepeatRule::weekdays(days, spec.timezone.clone())?)
        }
        (None, true) => Ok(RepeatRule::Once),
    }
}

fn resolve_sound(spec: &AlarmSpec) -> Result<SoundProfile, ConfigError> {
    let mut sound = SoundProfile::default();
    let Some(overrides) = &spec.sound else {
        return Ok(sound);
    };

    if let Some(asset) = &overrides.asset {
        sound.asset = asset.clone();
    }
    if let Some(fade_in) = overrides.fade_in {
        sound.fade_in = Duration::from_secs(fade_in);
    }
    if let Some(volume) = overrides.volume {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ConfigError::invalid(
                &spec.id,
                format!("volume must be within 0.0..=1.0, got {}", volume),
            ));
        }
        sound.volume = volume;
    }
    if let Some(loop_audio) = overrides.loop_audio {
        sound.loop_audio = loop_audio;
    }
    if let Some(vibrate) = overrides.vibrate {
        sound.vibrate = vibrate;
    }
    Ok(sound)
}

fn resolve_snooze(spec: &AlarmSpec, defaults: &EngineConfig) -> SnoozePolicy {
    match &spec.snooze {
        None => SnoozePolicy::limited(defaults.default_snooze_max, defaults.default_snooze),
        Some(overrides) => {
            if overrides.enabled == Some(false) {
                return SnoozePolicy::Disabled;
            }
            SnoozePolicy::limited(
                overrides.max_count.unwrap_or(defaults.default_snooze_max),
                overrides
                    .duration
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.default_snooze),
            )
        }
    }
}
