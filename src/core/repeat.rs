//! Repeat rules and next-occurrence calculation.
//!
//! Supports one-shot alarms, fixed-interval repeats (e.g. every 4h), and
//! weekday-set repeats that re-fire at the alarm's original local wall-clock
//! time on each listed weekday, timezone-aware.

use chrono::{DateTime, Datelike, Days, LocalResult, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when building or evaluating repeat rules.
#[derive(Debug, Error)]
pub enum RepeatError {
    /// Invalid interval expression or zero-length interval.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Weekday rule with an empty weekday set.
    #[error("weekday rule requires at least one weekday")]
    EmptyWeekdaySet,
}

/// How an alarm's trigger time is recomputed after it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatRule {
    /// Fire once, then retire.
    Once,

    /// Fire at a fixed interval from the original trigger time.
    Interval {
        #[serde(with = "serde_duration")]
        every: Duration,
    },

    /// Fire on each listed weekday at the original local wall-clock time.
    Weekdays {
        /// Deduplicated, ordered Monday-first.
        #[serde(with = "serde_weekdays")]
        days: Vec<Weekday>,
        /// IANA timezone name the wall-clock time is anchored in.
        timezone: String,
    },
}

impl RepeatRule {
    /// Create a fixed-interval rule.
    ///
    /// The interval must be non-zero.
    pub fn interval(every: Duration) -> Result<Self, RepeatError> {
        if every.is_zero() {
            return Err(RepeatError::InvalidInterval("zero interval".into()));
        }
        Ok(RepeatRule::Interval { every })
    }

    /// Create a weekday-set rule anchored in the given timezone.
    pub fn weekdays(
        days: impl IntoIterator<Item = Weekday>,
        timezone: impl Into<String>,
    ) -> Result<Self, RepeatError> {
        let mut days: Vec<Weekday> = days.into_iter().collect();
        days.sort_by_key(|day| day.num_days_from_monday());
        days.dedup();
        if days.is_empty() {
            return Err(RepeatError::EmptyWeekdaySet);
        }
        let timezone = timezone.into();
        timezone
            .parse::<Tz>()
            .map_err(|_| RepeatError::InvalidTimezone(timezone.clone()))?;
        Ok(RepeatRule::Weekdays { days, timezone })
    }

    /// Whether this rule produces more than one occurrence.
    pub fn is_repeating(&self) -> bool {
        !matches!(self, RepeatRule::Once)
    }

    /// Get the next occurrence strictly after `after`.
    ///
    /// `anchor` is the alarm's original trigger time; it defines the phase of
    /// interval rules and the local wall-clock time of weekday rules. Returns
    /// `Ok(None)` when a one-shot rule has no occurrence after `after`.
    pub fn next_after(
        &self,
        anchor: DateTime<Utc>,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RepeatError> {
        if anchor > after {
            return Ok(Some(anchor));
        }

        match self {
            RepeatRule::Once => Ok(None),
            RepeatRule::Interval { every } => {
                let step_ms = every.as_millis() as i64;
                if step_ms <= 0 {
                    return Err(RepeatError::InvalidInterval("zero interval".into()));
                }
                let elapsed_ms = (after - anchor).num_milliseconds();
                let steps = elapsed_ms / step_ms + 1;
                Ok(Some(anchor + chrono::Duration::milliseconds(steps * step_ms)))
            }
            RepeatRule::Weekdays { days, timezone } => {
                let tz: Tz = timezone
                    .parse()
                    .map_err(|_| RepeatError::InvalidTimezone(timezone.clone()))?;
                if days.is_empty() {
                    return Err(RepeatError::EmptyWeekdaySet);
                }

                let wall_time = anchor.with_timezone(&tz).time();
                let after_local = after.with_timezone(&tz);

                // Scan at most a full week plus one day; the candidate on day
                // zero may be earlier the same day and must be skipped.
                for offset in 0..=7u64 {
                    let date = match after_local.date_naive().checked_add_days(Days::new(offset)) {
                        Some(d) => d,
                        None => break,
                    };
                    if !days.contains(&date.weekday()) {
                        continue;
                    }
                    let naive = date.and_time(wall_time);
                    let candidate = match tz.from_local_datetime(&naive) {
                        LocalResult::Single(dt) => Some(dt),
                        // Fall-back transition: the wall time exists twice;
                        // take the earlier instant.
                        LocalResult::Ambiguous(earliest, _) => Some(earliest),
                        // Spring-forward gap: the wall time does not exist;
                        // shift forward one hour.
                        LocalResult::None => tz
                            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                            .earliest(),
                    };
                    if let Some(candidate) = candidate {
                        let candidate = candidate.with_timezone(&Utc);
                        if candidate > after {
                            return Ok(Some(candidate));
                        }
                    }
                }

                // Unreachable for a non-empty weekday set, but do not panic.
                Err(RepeatError::EmptyWeekdaySet)
            }
        }
    }
}

impl Default for RepeatRule {
    fn default() -> Self {
        RepeatRule::Once
    }
}

/// Parse a duration string like "5m", "1h", "1h30m", "30s", "1d".
pub fn parse_duration(s: &str) -> Result<Duration, RepeatError> {
    let trimmed = s.trim();
    let mut total_secs: u64 = 0;
    let mut current_num = String::new();

    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else {
            let num: u64 = current_num
                .parse()
                .map_err(|_| RepeatError::InvalidInterval(s.to_string()))?;
            current_num.clear();

            match c {
                's' => total_secs += num,
                'm' => total_secs += num * 60,
                'h' => total_secs += num * 3600,
                'd' => total_secs += num * 86400,
                _ => return Err(RepeatError::InvalidInterval(s.to_string())),
            }
        }
    }

    if !current_num.is_empty() || total_secs == 0 {
        return Err(RepeatError::InvalidInterval(s.to_string()));
    }

    Ok(Duration::from_secs(total_secs))
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as whole seconds (matching the YAML config format).
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for weekday sets.
///
/// Serializes weekdays as lowercase three-letter names ("mon".."sun").
mod serde_weekdays {
    use chrono::Weekday;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    fn to_str(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        }
    }

    pub(super) fn from_str(s: &str) -> Option<Weekday> {
        match s.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Some(Weekday::Mon),
            "tue" | "tuesday" => Some(Weekday::Tue),
            "wed" | "wednesday" => Some(Weekday::Wed),
            "thu" | "thursday" => Some(Weekday::Thu),
            "fri" | "friday" => Some(Weekday::Fri),
            "sat" | "saturday" => Some(Weekday::Sat),
            "sun" | "sunday" => Some(Weekday::Sun),
            _ => None,
        }
    }

    pub fn serialize<S>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let names: Vec<&str> = days.iter().map(|d| to_str(*d)).collect();
        names.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Weekday>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        names
            .iter()
            .map(|n| from_str(n).ok_or_else(|| D::Error::custom(format!("unknown weekday: {}", n))))
            .collect()
    }
}

/// Parse a weekday name ("mon", "monday", ...).
pub fn parse_weekday(s: &str) -> Result<Weekday, RepeatError> {
    serde_weekdays::from_str(s).ok_or_else(|| RepeatError::InvalidInterval(s.to_string()))
}
