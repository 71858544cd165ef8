// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence implementation.
//!
//! Records live in a sharded concurrent map keyed by canonical instance id.
//! Each operation holds the shard lock for its key for the whole
//! read-check-write, so operations on one instance are serialized and
//! operations on different instances proceed in parallel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, instrument};

use crate::descriptor::StateType;
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::serializer::SerializedState;

use super::{InstanceRecord, Persistence, UpdateGuard, ensure_state_type, update_rejection};

/// In-memory persistence provider. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    records: Arc<DashMap<String, InstanceRecord>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    async fn create_instance(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
    ) -> Result<InstanceRecord> {
        let instance_id = id.encode();

        match self.records.entry(instance_id.clone()) {
            Entry::Occupied(_) => Err(JourneyError::AlreadyExists { instance_id }),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let record = InstanceRecord {
                    instance_id,
                    journey_name: id.journey_name().to_string(),
                    state_type: state.state_type.to_string(),
                    state: state.payload.clone(),
                    completed: false,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                };
                slot.insert(record.clone());
                debug!("Instance record created");
                Ok(record)
            }
        }
    }

    async fn get_instance(
        &self,
        id: &JourneyInstanceId,
        state_type: &StateType,
    ) -> Result<Option<InstanceRecord>> {
        let Some(record) = self.records.get(&id.encode()) else {
            return Ok(None);
        };
        ensure_state_type(&record, state_type)?;
        Ok(Some(record.clone()))
    }

    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    async fn update_instance_state(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
        guard: UpdateGuard,
    ) -> Result<i64> {
        let instance_id = id.encode();
        let Some(mut record) = self.records.get_mut(&instance_id) else {
            return Err(update_rejection(&instance_id, None, &state.state_type, guard));
        };

        let version_ok = guard
            .expected_version
            .is_none_or(|expected| expected == record.version);
        let writable = record.state_type == state.state_type.as_str()
            && (!record.completed || guard.allow_completed)
            && version_ok;
        if !writable {
            return Err(update_rejection(
                &instance_id,
                Some(&*record),
                &state.state_type,
                guard,
            ));
        }

        record.state = state.payload.clone();
        record.version += 1;
        record.updated_at = Utc::now();
        debug!(version = record.version, "Instance state updated");
        Ok(record.version)
    }

    #[instrument(skip(self, id), fields(instance_id = %id))]
    async fn complete_instance(
        &self,
        id: &JourneyInstanceId,
        state_type: &StateType,
    ) -> Result<()> {
        let instance_id = id.encode();
        let Some(mut record) = self.records.get_mut(&instance_id) else {
            return Err(JourneyError::NotFound { instance_id });
        };
        ensure_state_type(&record, state_type)?;

        if !record.completed {
            let now = Utc::now();
            record.completed = true;
            record.completed_at = Some(now);
            record.updated_at = now;
            debug!("Instance marked completed");
        }
        Ok(())
    }

    #[instrument(skip(self, id), fields(instance_id = %id))]
    async fn delete_instance(&self, id: &JourneyInstanceId, state_type: &StateType) -> Result<()> {
        let instance_id = id.encode();
        if let Entry::Occupied(entry) = self.records.entry(instance_id) {
            ensure_state_type(entry.get(), state_type)?;
            entry.remove();
            debug!("Instance record deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wizard_id(uk: &str) -> JourneyInstanceId {
        JourneyInstanceId::new("wizard", vec![], Some(uk.to_string()))
    }

    fn state(step: u32) -> SerializedState {
        SerializedState {
            state_type: StateType::from("wizard.v1"),
            payload: format!(r#"{{"step":{step}}}"#).into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");

        let created = store.create_instance(&id, &state(0)).await.unwrap();
        assert_eq!(created.instance_id, "wizard#abc");
        assert_eq!(created.version, 1);
        assert!(!created.completed);

        let fetched = store
            .get_instance(&id, &StateType::from("wizard.v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");

        store.create_instance(&id, &state(0)).await.unwrap();
        let err = store.create_instance(&id, &state(5)).await.unwrap_err();
        assert!(matches!(err, JourneyError::AlreadyExists { .. }));

        // First writer's state is kept
        let record = store
            .get_instance(&id, &StateType::from("wizard.v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, br#"{"step":0}"#);
    }

    #[tokio::test]
    async fn test_get_with_other_type_fails() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");
        store.create_instance(&id, &state(0)).await.unwrap();

        let err = store
            .get_instance(&id, &StateType::from("wizard.v2"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_MISMATCH");
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");
        store.create_instance(&id, &state(0)).await.unwrap();

        let version = store
            .update_instance_state(&id, &state(1), UpdateGuard::default())
            .await
            .unwrap();
        assert_eq!(version, 2);

        let err = store
            .update_instance_state(
                &id,
                &state(2),
                UpdateGuard {
                    expected_version: Some(1),
                    allow_completed: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_completed_instance_is_read_only() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");
        let v1 = StateType::from("wizard.v1");
        store.create_instance(&id, &state(0)).await.unwrap();

        store.complete_instance(&id, &v1).await.unwrap();
        let first = store.get_instance(&id, &v1).await.unwrap().unwrap();
        store.complete_instance(&id, &v1).await.unwrap();
        let second = store.get_instance(&id, &v1).await.unwrap().unwrap();
        assert!(second.completed);
        assert_eq!(first.completed_at, second.completed_at);

        let err = store
            .update_instance_state(&id, &state(1), UpdateGuard::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INSTANCE_COMPLETED");

        let override_guard = UpdateGuard {
            expected_version: None,
            allow_completed: true,
        };
        store
            .update_instance_state(&id, &state(7), override_guard)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryPersistence::new();
        let id = wizard_id("abc");
        let v1 = StateType::from("wizard.v1");
        store.create_instance(&id, &state(0)).await.unwrap();

        let err = store
            .delete_instance(&id, &StateType::from("other"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_MISMATCH");

        store.delete_instance(&id, &v1).await.unwrap();
        store.delete_instance(&id, &v1).await.unwrap();
        assert!(store.get_instance(&id, &v1).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_instance_errors() {
        let store = MemoryPersistence::new();
        let id = wizard_id("missing");
        let v1 = StateType::from("wizard.v1");

        let err = store
            .update_instance_state(&id, &state(1), UpdateGuard::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err = store.complete_instance(&id, &v1).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
