//! SQLite storage implementation.
//!
//! Provides persistent storage using a single `alarms` table keyed by alarm
//! id; the row carries the alarm definition plus its live occurrence state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::{AlarmStore, OccurrenceRecord, OccurrenceState, StoreError, StoredAlarm};
use crate::core::types::{AlarmId, OccurrenceId, RegistrationId};
use crate::core::{Alarm, RepeatRule, SnoozePolicy, SoundProfile};

/// SQLite storage backend.
///
/// Creates the database file if it doesn't exist and runs migrations.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StoreError::Persistence(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn exists(&self, id: &AlarmId) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM alarms WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        Ok(row.is_some())
    }
}

// Row shape: alarm columns followed by the nullable occurrence columns.
type AlarmRow = (
    String,         // id
    String,         // label
    String,         // trigger_at
    String,         // repeat_rule
    String,         // sound
    String,         // snooze
    bool,           // enabled
    String,         // created_at
    String,         // updated_at
    Option<String>, // occ_id
    Option<String>, // occ_state
    Option<String>, // occ_fire_at
    i64,            // occ_snoozes
    Option<String>, // occ_registration
);

const SELECT_COLUMNS: &str = "id, label, trigger_at, repeat_rule, sound, snooze, enabled, \
     created_at, updated_at, occ_id, occ_state, occ_fire_at, occ_snoozes, occ_registration";

fn datetime_to_string(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {:?}: {}", s, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn state_to_string(state: OccurrenceState) -> &'static str {
    match state {
        OccurrenceState::Scheduled => "scheduled",
        OccurrenceState::Triggered => "triggered",
        OccurrenceState::Delivering => "delivering",
        OccurrenceState::Acknowledged => "acknowledged",
        OccurrenceState::Snoozed => "snoozed",
    }
}

fn string_to_state(s: &str) -> Result<OccurrenceState, StoreError> {
    match s {
        "scheduled" => Ok(OccurrenceState::Scheduled),
        "triggered" => Ok(OccurrenceState::Triggered),
        "delivering" => Ok(OccurrenceState::Delivering),
        "acknowledged" => Ok(OccurrenceState::Acknowledged),
        "snoozed" => Ok(OccurrenceState::Snoozed),
        other => Err(StoreError::Serialization(format!(
            "unknown occurrence state: {}",
            other
        ))),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Serialization(format!("bad uuid {:?}: {}", s, e)))
}

fn row_to_stored(row: AlarmRow) -> Result<StoredAlarm, StoreError> {
    let repeat: RepeatRule = from_json(&row.3)?;
    let sound: SoundProfile = from_json(&row.4)?;
    let snooze: SnoozePolicy = from_json(&row.5)?;

    let alarm = Alarm {
        id: AlarmId::new(row.0),
        label: row.1,
        trigger_time: string_to_datetime(&row.2)?,
        repeat,
        sound,
        snooze,
        enabled: row.6,
        created_at: string_to_datetime(&row.7)?,
        updated_at: string_to_datetime(&row.8)?,
    };

    let occurrence = match (row.9, row.10, row.11) {
        (Some(occ_id), Some(state), Some(fire_at)) => Some(OccurrenceRecord {
            occurrence_id: OccurrenceId::from_uuid(parse_uuid(&occ_id)?),
            state: string_to_state(&state)?,
            fire_at: string_to_datetime(&fire_at)?,
            snooze_count: row.12 as u32,
            registration: row
                .13
                .as_deref()
                .map(|r| parse_uuid(r).map(RegistrationId::from_uuid))
                .transpose()?,
        }),
        _ => None,
    };

    Ok(StoredAlarm { alarm, occurrence })
}

#[async_trait]
impl AlarmStore for SqliteStore {
    async fn create(&self, alarm: Alarm) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO alarms (id, label, trigger_at, repeat_rule, sound, snooze, enabled,
                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alarm.id.as_str())
        .bind(&alarm.label)
        .bind(datetime_to_string(alarm.trigger_time))
        .bind(to_json(&alarm.repeat)?)
        .bind(to_json(&alarm.sound)?)
        .bind(to_json(&alarm.snooze)?)
        .bind(alarm.enabled)
        .bind(datetime_to_string(alarm.created_at))
        .bind(datetime_to_string(alarm.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateId(alarm.id.to_string()))
            }
            Err(e) => Err(StoreError::Persistence(e.to_string())),
        }
    }

    async fn update(&self, alarm: Alarm) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE alarms
            SET label = ?, trigger_at = ?, repeat_rule = ?, sound = ?, snooze = ?,
                enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&alarm.label)
        .bind(datetime_to_string(alarm.trigger_time))
        .bind(to_json(&alarm.repeat)?)
        .bind(to_json(&alarm.sound)?)
        .bind(to_json(&alarm.snooze)?)
        .bind(alarm.enabled)
        .bind(datetime_to_string(Utc::now()))
        .bind(alarm.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(alarm.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &AlarmId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM alarms WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &AlarmId) -> Result<StoredAlarm, StoreError> {
        let row: AlarmRow =
            sqlx::query_as(&format!("SELECT {} FROM alarms WHERE id = ?", SELECT_COLUMNS))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Persistence(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        row_to_stored(row)
    }

    async fn list(&self) -> Result<Vec<StoredAlarm>, StoreError> {
        let rows: Vec<AlarmRow> =
            sqlx::query_as(&format!("SELECT {} FROM alarms ORDER BY id ASC", SELECT_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Persistence(e.to_string()))?;

        rows.into_iter().map(row_to_stored).collect()
    }

    async fn set_occurrence(
        &self,
        id: &AlarmId,
        occurrence: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError> {
        let result = match occurrence {
            Some(occ) => sqlx::query(
                r#"
                UPDATE alarms
                SET occ_id = ?, occ_state = ?, occ_fire_at = ?, occ_snoozes = ?,
                    occ_registration = ?
                WHERE id = ?
                "#,
            )
            .bind(occ.occurrence_id.as_uuid().to_string())
            .bind(state_to_string(occ.state))
            .bind(datetime_to_string(occ.fire_at))
            .bind(occ.snooze_count as i64)
            .bind(occ.registration.map(|r| r.as_uuid().to_string()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await,
            None => sqlx::query(
                r#"
                UPDATE alarms
                SET occ_id = NULL, occ_state = NULL, occ_fire_at = NULL, occ_snoozes = 0,
                    occ_registration = NULL
                WHERE id = ?
                "#,
            )
            .bind(id.as_str())
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn transition_occurrence(
        &self,
        id: &AlarmId,
        expected: OccurrenceState,
        next: OccurrenceState,
    ) -> Result<bool, StoreError> {
        // Single conditional UPDATE; SQLite serializes writers, which makes
        // this the compare-and-set primitive.
        let result = sqlx::query("UPDATE alarms SET occ_state = ? WHERE id = ? AND occ_state = ?")
            .bind(state_to_string(next))
            .bind(id.as_str())
            .bind(state_to_string(expected))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.exists(id).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(false)
    }

    async fn complete_occurrence(
        &self,
        id: &AlarmId,
        next: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError> {
        // One statement replaces the finished occurrence and installs the
        // next (or retires the alarm); a crash can never observe the
        // in-between.
        let result = match next {
            Some(occ) => sqlx::query(
                r#"
                UPDATE alarms
                SET occ_id = ?, occ_state = ?, occ_fire_at = ?, occ_snoozes = ?,
                    occ_registration = ?
                WHERE id = ?
                "#,
            )
            .bind(occ.occurrence_id.as_uuid().to_string())
            .bind(state_to_string(occ.state))
            .bind(datetime_to_string(occ.fire_at))
            .bind(occ.snooze_count as i64)
            .bind(occ.registration.map(|r| r.as_uuid().to_string()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await,
            None => sqlx::query(
                r#"
                UPDATE alarms
                SET occ_id = NULL, occ_state = NULL, occ_fire_at = NULL, occ_snoozes = 0,
                    occ_registration = NULL, enabled = 0, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(datetime_to_string(Utc::now()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
