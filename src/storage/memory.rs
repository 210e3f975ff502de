//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.
//! Data is not persisted across restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{AlarmStore, OccurrenceRecord, OccurrenceState, StoreError, StoredAlarm};
use crate::core::types::AlarmId;
use crate::core::Alarm;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
pub struct MemoryStore {
    alarms: RwLock<HashMap<AlarmId, StoredAlarm>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            alarms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn create(&self, alarm: Alarm) -> Result<(), StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        if alarms.contains_key(&alarm.id) {
            return Err(StoreError::DuplicateId(alarm.id.to_string()));
        }
        alarms.insert(alarm.id.clone(), StoredAlarm::new(alarm));
        Ok(())
    }

    async fn update(&self, alarm: Alarm) -> Result<(), StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = alarms
            .get_mut(&alarm.id)
            .ok_or_else(|| StoreError::NotFound(alarm.id.to_string()))?;
        stored.alarm = alarm;
        Ok(())
    }

    async fn delete(&self, id: &AlarmId) -> Result<(), StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        alarms
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &AlarmId) -> Result<StoredAlarm, StoreError> {
        let alarms = self.alarms.read().map_err(|_| StoreError::LockPoisoned)?;
        alarms
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<StoredAlarm>, StoreError> {
        let alarms = self.alarms.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result: Vec<_> = alarms.values().cloned().collect();
        result.sort_by(|a, b| a.alarm.id.cmp(&b.alarm.id));
        Ok(result)
    }

    async fn set_occurrence(
        &self,
        id: &AlarmId,
        occurrence: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = alarms
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        stored.occurrence = occurrence;
        Ok(())
    }

    async fn transition_occurrence(
        &self,
        id: &AlarmId,
        expected: OccurrenceState,
        next: OccurrenceState,
    ) -> Result<bool, StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = alarms
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match stored.occurrence.as_mut() {
            Some(occurrence) if occurrence.state == expected => {
                occurrence.state = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_occurrence(
        &self,
        id: &AlarmId,
        next: Option<OccurrenceRecord>,
    ) -> Result<(), StoreError> {
        let mut alarms = self.alarms.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = alarms
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match next {
            Some(occurrence) => stored.occurrence = Some(occurrence),
            None => {
                stored.occurrence = None;
                stored.alarm.enabled = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn alarm(id: &str) -> Alarm {
        Alarm::new(id, Utc::now() + ChronoDuration::hours(1))
    }

    #[tokio::test]
    async fn test_create_and_get_alarm() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();

        let stored = store.get(&AlarmId::new("a1")).await.unwrap();
        assert_eq!(stored.alarm.id.as_str(), "a1");
        assert!(stored.occurrence.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();

        let result = store.create(alarm("a1")).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_get_missing_returns_not_found() {
        let store = MemoryStore::new();
        let result = store.get(&AlarmId::new("ghost")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_preserves_occurrence() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();

        let occ = OccurrenceRecord::scheduled(Utc::now() + ChronoDuration::hours(1));
        store
            .set_occurrence(&AlarmId::new("a1"), Some(occ.clone()))
            .await
            .unwrap();

        let updated = alarm("a1").with_label("renamed");
        store.update(updated).await.unwrap();

        let stored = store.get(&AlarmId::new("a1")).await.unwrap();
        assert_eq!(stored.alarm.label, "renamed");
        assert_eq!(stored.occurrence, Some(occ));
    }

    #[tokio::test]
    async fn test_update_missing_returns_not_found() {
        let store = MemoryStore::new();
        let result = store.update(alarm("ghost")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_alarm() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();
        store.delete(&AlarmId::new("a1")).await.unwrap();

        assert!(store.get(&AlarmId::new("a1")).await.is_err());
        assert!(matches!(
            store.delete(&AlarmId::new("a1")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = MemoryStore::new();
        store.create(alarm("charlie")).await.unwrap();
        store.create(alarm("alpha")).await.unwrap();
        store.create(alarm("bravo")).await.unwrap();

        let alarms = store.list().await.unwrap();
        let ids: Vec<&str> = alarms.iter().map(|a| a.alarm.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    }

    #[tokio::test]
    async fn test_transition_matches_expected_state() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();
        let id = AlarmId::new("a1");
        store
            .set_occurrence(&id, Some(OccurrenceRecord::scheduled(Utc::now())))
            .await
            .unwrap();

        let moved = store
            .transition_occurrence(&id, OccurrenceState::Scheduled, OccurrenceState::Triggered)
            .await
            .unwrap();
        assert!(moved);

        // A second identical transition must fail the compare.
        let moved = store
            .transition_occurrence(&id, OccurrenceState::Scheduled, OccurrenceState::Triggered)
            .await
            .unwrap();
        assert!(!moved);

        let stored = store.get(&id).await.unwrap();
        assert_eq!(
            stored.occurrence.unwrap().state,
            OccurrenceState::Triggered
        );
    }

    #[tokio::test]
    async fn test_transition_without_occurrence_returns_false() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();

        let moved = store
            .transition_occurrence(
                &AlarmId::new("a1"),
                OccurrenceState::Scheduled,
                OccurrenceState::Triggered,
            )
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn test_complete_with_next_replaces_occurrence() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();
        let id = AlarmId::new("a1");
        store
            .set_occurrence(&id, Some(OccurrenceRecord::scheduled(Utc::now())))
            .await
            .unwrap();

        let next = OccurrenceRecord::scheduled(Utc::now() + ChronoDuration::days(1));
        store.complete_occurrence(&id, Some(next.clone())).await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert!(stored.alarm.enabled);
        assert_eq!(stored.occurrence, Some(next));
    }

    #[tokio::test]
    async fn test_complete_without_next_retires_alarm() {
        let store = MemoryStore::new();
        store.create(alarm("a1")).await.unwrap();
        let id = AlarmId::new("a1");
        store
            .set_occurrence(&id, Some(OccurrenceRecord::scheduled(Utc::now())))
            .await
            .unwrap();

        store.complete_occurrence(&id, None).await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert!(!stored.alarm.enabled);
        assert!(stored.occurrence.is_none());
    }
}
