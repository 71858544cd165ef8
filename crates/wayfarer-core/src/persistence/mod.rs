// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for journey instances.
//!
//! One record per instance, keyed by the canonical encoding of its
//! [`JourneyInstanceId`]. Every call carries the expected [`StateType`] so a
//! backend can reject mismatched reads and writes without decoding state.
//!
//! Backends:
//! - [`MemoryPersistence`]: process-local map, for tests and single-node demos
//! - [`SqlitePersistence`]: durable, file or in-memory SQLite
//! - [`PostgresPersistence`]: durable, shared PostgreSQL

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::descriptor::StateType;
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::serializer::SerializedState;

/// Instance record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Canonical encoded instance id.
    pub instance_id: String,
    /// Journey the instance belongs to.
    pub journey_name: String,
    /// Type tag of the stored state.
    pub state_type: String,
    /// Serialized state.
    pub state: Vec<u8>,
    /// Whether the journey has been marked completed.
    pub completed: bool,
    /// Incremented on every state write.
    pub version: i64,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the state or completion flag last changed.
    pub updated_at: DateTime<Utc>,
    /// When the instance was completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// The stored state with its type tag.
    pub fn serialized_state(&self) -> SerializedState {
        SerializedState {
            state_type: StateType::new(self.state_type.clone()),
            payload: self.state.clone(),
        }
    }
}

/// Conditions attached to a state write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateGuard {
    /// Reject the write unless the stored version equals this one.
    pub expected_version: Option<i64>,
    /// Allow writing state of a completed instance (administrative override).
    pub allow_completed: bool,
}

/// Persistence interface used by the journey runtime.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn create_instance(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
    ) -> Result<InstanceRecord>;

    /// Read a record. Fails with `TypeMismatch` if it holds another state type.
    async fn get_instance(
        &self,
        id: &JourneyInstanceId,
        state_type: &StateType,
    ) -> Result<Option<InstanceRecord>>;

    /// Replace the stored state and return the new version.
    ///
    /// Fails with `NotFound`, `TypeMismatch`, `InstanceCompleted` (unless the
    /// guard allows it) or `Conflict` (when the guard carries a version).
    async fn update_instance_state(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
        guard: UpdateGuard,
    ) -> Result<i64>;

    /// Mark the instance completed. Completing twice is a no-op.
    async fn complete_instance(&self, id: &JourneyInstanceId, state_type: &StateType)
    -> Result<()>;

    /// Remove the record. Deleting an absent record is a no-op.
    async fn delete_instance(&self, id: &JourneyInstanceId, state_type: &StateType) -> Result<()>;
}

pub(crate) fn ensure_state_type(record: &InstanceRecord, state_type: &StateType) -> Result<()> {
    if record.state_type != state_type.as_str() {
        return Err(JourneyError::TypeMismatch {
            instance_id: record.instance_id.clone(),
            expected: state_type.to_string(),
            actual: record.state_type.clone(),
        });
    }
    Ok(())
}

/// Explain why a conditional update matched no record.
pub(crate) fn update_rejection(
    instance_id: &str,
    current: Option<&InstanceRecord>,
    state_type: &StateType,
    guard: UpdateGuard,
) -> JourneyError {
    let Some(record) = current else {
        return JourneyError::NotFound {
            instance_id: instance_id.to_string(),
        };
    };

    if let Err(e) = ensure_state_type(record, state_type) {
        return e;
    }

    if record.completed && !guard.allow_completed {
        return JourneyError::InstanceCompleted {
            instance_id: instance_id.to_string(),
        };
    }

    match guard.expected_version {
        Some(expected) if expected != record.version => JourneyError::Conflict {
            instance_id: instance_id.to_string(),
            expected,
            actual: record.version,
        },
        _ => JourneyError::store("update_instance_state", "instance changed during update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(completed: bool, version: i64) -> InstanceRecord {
        InstanceRecord {
            instance_id: "wizard#abc".to_string(),
            journey_name: "wizard".to_string(),
            state_type: "wizard.v1".to_string(),
            state: b"{}".to_vec(),
            completed,
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_update_rejection_reasons() {
        let v1 = StateType::from("wizard.v1");
        let v2 = StateType::from("wizard.v2");

        assert_eq!(
            update_rejection("wizard#abc", None, &v1, UpdateGuard::default()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            update_rejection("wizard#abc", Some(&record(false, 1)), &v2, UpdateGuard::default())
                .error_code(),
            "TYPE_MISMATCH"
        );
        assert_eq!(
            update_rejection("wizard#abc", Some(&record(true, 1)), &v1, UpdateGuard::default())
                .error_code(),
            "INSTANCE_COMPLETED"
        );
        assert_eq!(
            update_rejection(
                "wizard#abc",
                Some(&record(false, 3)),
                &v1,
                UpdateGuard {
                    expected_version: Some(2),
                    allow_completed: false,
                }
            ),
            JourneyError::Conflict {
                instance_id: "wizard#abc".to_string(),
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_serialized_state_from_record() {
        let state = record(false, 1).serialized_state();
        assert_eq!(state.state_type.as_str(), "wizard.v1");
        assert_eq!(state.payload, b"{}");
    }
}
