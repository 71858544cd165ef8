// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory journey instance handles.
//!
//! [`JourneyInstance<S>`] is what host code works with: it owns the decoded
//! state and writes every mutation back through the runtime before updating
//! its own copy. [`AnyJourneyInstance`] is the untyped form the pipeline
//! attaches to a request before a handler names the state type it expects.

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::descriptor::{JourneyState, StateType};
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::persistence::{InstanceRecord, UpdateGuard};
use crate::runtime::{ConcurrencyMode, JourneyRuntime};
use crate::serializer::SerializedState;

/// Request-scoped extras carried on a handle. Never persisted.
pub type Properties = HashMap<String, serde_json::Value>;

/// Property set by the activation stage on an instance it just created.
pub const ACTIVATED_PROPERTY: &str = "wayfarer.activated";

/// Untyped instance handle.
#[derive(Debug, Clone)]
pub struct AnyJourneyInstance {
    id: JourneyInstanceId,
    state: SerializedState,
    properties: Properties,
    completed: bool,
    version: i64,
}

impl AnyJourneyInstance {
    pub(crate) fn from_record(
        id: JourneyInstanceId,
        record: InstanceRecord,
        properties: Properties,
    ) -> Self {
        Self {
            state: record.serialized_state(),
            completed: record.completed,
            version: record.version,
            id,
            properties,
        }
    }

    /// Instance identity.
    pub fn id(&self) -> &JourneyInstanceId {
        &self.id
    }

    /// Type tag of the held state.
    pub fn state_type(&self) -> &StateType {
        &self.state.state_type
    }

    /// Serialized state.
    pub fn serialized_state(&self) -> &SerializedState {
        &self.state
    }

    /// Request-scoped properties.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Whether the journey is completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Bind to a concrete state type.
    ///
    /// Fails with `TypeMismatch` if the held state is of another type.
    pub fn into_typed<S: JourneyState>(self, runtime: &JourneyRuntime) -> Result<JourneyInstance<S>> {
        let state = self
            .state
            .to_state::<S>(runtime.serializer(), &self.id.encode())?;

        Ok(JourneyInstance {
            runtime: runtime.clone(),
            id: self.id,
            state,
            properties: self.properties,
            completed: self.completed,
            version: self.version,
        })
    }
}

/// Typed instance handle.
///
/// The only sanctioned path for host code to read and mutate journey state.
#[derive(Debug, Clone)]
pub struct JourneyInstance<S> {
    runtime: JourneyRuntime,
    id: JourneyInstanceId,
    state: S,
    properties: Properties,
    completed: bool,
    version: i64,
}

impl<S: JourneyState> JourneyInstance<S> {
    pub(crate) fn from_record(
        runtime: JourneyRuntime,
        id: JourneyInstanceId,
        record: InstanceRecord,
        properties: Properties,
    ) -> Result<Self> {
        AnyJourneyInstance::from_record(id, record, properties).into_typed(&runtime)
    }

    /// Instance identity.
    pub fn id(&self) -> &JourneyInstanceId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Request-scoped properties.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// A single property.
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// Whether the activation stage created this instance on the current request.
    pub fn was_activated(&self) -> bool {
        self.property(ACTIVATED_PROPERTY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether the journey is completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Version of the state this handle last wrote or read.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Apply `mutator` to the current state and persist the result.
    ///
    /// The handle is only updated once the store accepted the write. In
    /// optimistic mode a concurrent write since this handle last synced fails
    /// with `Conflict`; call [`refresh`](Self::refresh) and retry.
    #[instrument(skip(self, mutator), fields(instance_id = %self.id))]
    pub async fn update_state<F>(&mut self, mutator: F) -> Result<()>
    where
        F: FnOnce(S) -> S,
    {
        if self.completed {
            return Err(JourneyError::InstanceCompleted {
                instance_id: self.id.encode(),
            });
        }

        let next = mutator(self.state.clone());
        let serialized = SerializedState::from_state(self.runtime.serializer(), &next)?;
        let guard = UpdateGuard {
            expected_version: match self.runtime.concurrency() {
                ConcurrencyMode::LastWriterWins => None,
                ConcurrencyMode::Optimistic => Some(self.version),
            },
            allow_completed: false,
        };

        let persistence = self.runtime.persistence();
        let version = self
            .runtime
            .store_call(
                "update_instance_state",
                persistence.update_instance_state(&self.id, &serialized, guard),
            )
            .await?;

        self.state = next;
        self.version = version;
        debug!(version, "Journey state updated");
        Ok(())
    }

    /// Mark the journey completed. Calling it again is a no-op.
    #[instrument(skip(self), fields(instance_id = %self.id))]
    pub async fn mark_completed(&mut self) -> Result<()> {
        let state_type = StateType::of::<S>();
        let persistence = self.runtime.persistence();
        self.runtime
            .store_call(
                "complete_instance",
                persistence.complete_instance(&self.id, &state_type),
            )
            .await?;

        if !self.completed {
            info!("Journey completed");
        }
        self.completed = true;
        Ok(())
    }

    /// Re-read state, version and completion from the store.
    ///
    /// Properties are kept as they are.
    pub async fn refresh(&mut self) -> Result<()> {
        let state_type = StateType::of::<S>();
        let persistence = self.runtime.persistence();
        let record = self
            .runtime
            .store_call(
                "get_instance",
                persistence.get_instance(&self.id, &state_type),
            )
            .await?
            .ok_or_else(|| JourneyError::NotFound {
                instance_id: self.id.encode(),
            })?;

        self.state = record
            .serialized_state()
            .to_state::<S>(self.runtime.serializer(), &record.instance_id)?;
        self.completed = record.completed;
        self.version = record.version;
        Ok(())
    }

    /// Delete the instance from the store.
    pub async fn delete(self) -> Result<()> {
        self.runtime.delete_instance::<S>(&self.id).await
    }
}
