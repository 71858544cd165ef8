// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey runtime.
//!
//! [`JourneyRuntime`] ties the descriptor registry, a persistence backend and a
//! state serializer together. It is cheap to clone and is what the pipeline
//! stages and instance handles hold on to.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wayfarer_core::descriptor::{DescriptorRegistry, JourneyDescriptor};
//! use wayfarer_core::persistence::SqlitePersistence;
//! use wayfarer_core::runtime::JourneyRuntime;
//!
//! let registry = DescriptorRegistry::builder()
//!     .register(JourneyDescriptor::new::<ProfileState>("edit-profile").request_key("personId"))
//!     .build()?;
//!
//! let runtime = JourneyRuntime::builder()
//!     .registry(Arc::new(registry))
//!     .persistence(Arc::new(SqlitePersistence::from_path(".data/journeys.db").await?))
//!     .build()?;
//! ```

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::descriptor::{DescriptorRegistry, JourneyDescriptor, JourneyState, StateType};
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::instance::{AnyJourneyInstance, JourneyInstance, Properties};
use crate::persistence::{Persistence, UpdateGuard};
use crate::serializer::{JsonStateSerializer, SerializedState, StateSerializer};

/// How concurrent writes to one instance are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// The last write replaces earlier ones.
    #[default]
    LastWriterWins,
    /// Writes carry the version they were based on; stale writes fail `Conflict`.
    Optimistic,
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "last-writer-wins" | "lww" => Ok(Self::LastWriterWins),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(format!("unknown concurrency mode '{}'", other)),
        }
    }
}

/// Builder for [`JourneyRuntime`].
pub struct JourneyRuntimeBuilder {
    registry: Option<Arc<DescriptorRegistry>>,
    persistence: Option<Arc<dyn Persistence>>,
    serializer: Arc<dyn StateSerializer>,
    concurrency: ConcurrencyMode,
    store_timeout: Option<Duration>,
}

impl fmt::Debug for JourneyRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JourneyRuntimeBuilder")
            .field("registry", &self.registry)
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("concurrency", &self.concurrency)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl Default for JourneyRuntimeBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            persistence: None,
            serializer: Arc::new(JsonStateSerializer),
            concurrency: ConcurrencyMode::default(),
            store_timeout: None,
        }
    }
}

impl JourneyRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the descriptor registry (required).
    pub fn registry(mut self, registry: Arc<DescriptorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the persistence backend (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Replace the state serializer.
    ///
    /// Default: JSON
    pub fn serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the concurrency mode.
    ///
    /// Default: [`ConcurrencyMode::LastWriterWins`]
    pub fn concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    /// Bound every store operation by `timeout`. `None` disables the bound.
    pub fn store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<JourneyRuntime> {
        let registry = self
            .registry
            .ok_or_else(|| JourneyError::Config("registry is required".to_string()))?;
        let persistence = self
            .persistence
            .ok_or_else(|| JourneyError::Config("persistence is required".to_string()))?;

        Ok(JourneyRuntime {
            inner: Arc::new(RuntimeInner {
                registry,
                persistence,
                serializer: self.serializer,
                concurrency: self.concurrency,
                store_timeout: self.store_timeout,
            }),
        })
    }
}

struct RuntimeInner {
    registry: Arc<DescriptorRegistry>,
    persistence: Arc<dyn Persistence>,
    serializer: Arc<dyn StateSerializer>,
    concurrency: ConcurrencyMode,
    store_timeout: Option<Duration>,
}

/// Shared entry point to journey instances.
#[derive(Clone)]
pub struct JourneyRuntime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for JourneyRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JourneyRuntime")
            .field("journeys", &self.inner.registry.len())
            .field("concurrency", &self.inner.concurrency)
            .field("store_timeout", &self.inner.store_timeout)
            .finish()
    }
}

impl JourneyRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> JourneyRuntimeBuilder {
        JourneyRuntimeBuilder::new()
    }

    /// The descriptor registry.
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.inner.registry
    }

    /// The persistence backend.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    /// The state serializer.
    pub fn serializer(&self) -> &dyn StateSerializer {
        self.inner.serializer.as_ref()
    }

    /// The concurrency mode.
    pub fn concurrency(&self) -> ConcurrencyMode {
        self.inner.concurrency
    }

    /// Run one store operation under the configured timeout.
    ///
    /// A timed-out future is dropped; backends only issue single-statement
    /// writes, so nothing is left half-applied.
    pub(crate) async fn store_call<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match self.inner.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(JourneyError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }),
            None => call.await,
        };

        if let Err(e) = &result
            && !e.is_expected()
        {
            warn!(operation, error = %e, "Journey store operation failed");
        }
        result
    }

    /// Create an instance with the given state.
    ///
    /// Fails with `AlreadyExists` if the identity is taken.
    #[instrument(skip(self, id, state, properties), fields(instance_id = %id))]
    pub async fn create_instance<S: JourneyState>(
        &self,
        id: JourneyInstanceId,
        state: S,
        properties: Properties,
    ) -> Result<JourneyInstance<S>> {
        let serialized = SerializedState::from_state(self.serializer(), &state)?;
        let record = self
            .store_call(
                "create_instance",
                self.persistence().create_instance(&id, &serialized),
            )
            .await?;

        info!(journey = id.journey_name(), "Journey instance created");
        JourneyInstance::from_record(self.clone(), id, record, properties)
    }

    /// Read an instance. Its properties start empty.
    pub async fn get_instance<S: JourneyState>(
        &self,
        id: &JourneyInstanceId,
    ) -> Result<Option<JourneyInstance<S>>> {
        let record = self
            .store_call(
                "get_instance",
                self.persistence().get_instance(id, &StateType::of::<S>()),
            )
            .await?;

        record
            .map(|r| JourneyInstance::from_record(self.clone(), id.clone(), r, Properties::new()))
            .transpose()
    }

    /// Read an instance, creating it from `initial` if absent.
    ///
    /// A concurrent creator winning the race is not an error: the record it
    /// wrote is read back and returned. The flag reports whether this call
    /// created the instance.
    pub async fn get_or_create_instance<S, F>(
        &self,
        id: JourneyInstanceId,
        initial: F,
        properties: Properties,
    ) -> Result<(JourneyInstance<S>, bool)>
    where
        S: JourneyState,
        F: FnOnce() -> S,
    {
        if let Some(existing) = self.get_instance::<S>(&id).await? {
            return Ok((existing, false));
        }

        match self.create_instance(id.clone(), initial(), properties).await {
            Ok(created) => Ok((created, true)),
            Err(JourneyError::AlreadyExists { .. }) => {
                debug!(instance_id = %id, "Lost create race, reading winner");
                let existing = self
                    .get_instance::<S>(&id)
                    .await?
                    .ok_or_else(|| JourneyError::NotFound {
                        instance_id: id.encode(),
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete an instance. Deleting an absent instance is a no-op.
    #[instrument(skip(self, id), fields(instance_id = %id))]
    pub async fn delete_instance<S: JourneyState>(&self, id: &JourneyInstanceId) -> Result<()> {
        self.store_call(
            "delete_instance",
            self.persistence()
                .delete_instance(id, &StateType::of::<S>()),
        )
        .await?;

        info!("Journey instance deleted");
        Ok(())
    }

    /// Replace an instance's state even if it is completed.
    ///
    /// Administrative path; host handlers go through [`JourneyInstance::update_state`].
    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    pub async fn override_state<S: JourneyState>(
        &self,
        id: &JourneyInstanceId,
        state: &S,
    ) -> Result<i64> {
        let serialized = SerializedState::from_state(self.serializer(), state)?;
        let guard = UpdateGuard {
            expected_version: None,
            allow_completed: true,
        };

        let version = self
            .store_call(
                "update_instance_state",
                self.persistence()
                    .update_instance_state(id, &serialized, guard),
            )
            .await?;

        warn!(version, "Journey state overridden administratively");
        Ok(version)
    }

    /// Read an instance without naming its state type.
    pub async fn get_any(
        &self,
        descriptor: &JourneyDescriptor,
        id: &JourneyInstanceId,
    ) -> Result<Option<AnyJourneyInstance>> {
        let record = self
            .store_call(
                "get_instance",
                self.persistence().get_instance(id, descriptor.state_type()),
            )
            .await?;

        Ok(record.map(|r| AnyJourneyInstance::from_record(id.clone(), r, Properties::new())))
    }

    /// Create an instance seeded with the descriptor's initial state,
    /// or read it back if a concurrent request created it first.
    ///
    /// The flag reports whether this call created the instance.
    #[instrument(skip(self, descriptor, id, properties), fields(instance_id = %id))]
    pub async fn create_any(
        &self,
        descriptor: &JourneyDescriptor,
        id: JourneyInstanceId,
        properties: Properties,
    ) -> Result<(AnyJourneyInstance, bool)> {
        let value = descriptor.initial_state(&id)?;
        let serialized =
            SerializedState::from_value(self.serializer(), descriptor.state_type().clone(), &value)?;

        match self
            .store_call(
                "create_instance",
                self.persistence().create_instance(&id, &serialized),
            )
            .await
        {
            Ok(record) => {
                info!(journey = descriptor.name(), "Journey instance created");
                Ok((AnyJourneyInstance::from_record(id, record, properties), true))
            }
            Err(JourneyError::AlreadyExists { .. }) => {
                debug!("Lost create race, reading winner");
                let existing = self
                    .get_any(descriptor, &id)
                    .await?
                    .ok_or_else(|| JourneyError::NotFound {
                        instance_id: id.encode(),
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WizardStateV1 {
        step: u32,
    }

    impl JourneyState for WizardStateV1 {
        const STATE_TYPE: &'static str = "wizard.v1";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WizardStateV2 {
        step: u32,
    }

    impl JourneyState for WizardStateV2 {
        const STATE_TYPE: &'static str = "wizard.v2";
    }

    fn registry() -> Arc<DescriptorRegistry> {
        Arc::new(
            DescriptorRegistry::builder()
                .register(JourneyDescriptor::new::<WizardStateV1>("wizard").requires_unique_key(true))
                .build()
                .unwrap(),
        )
    }

    fn runtime() -> JourneyRuntime {
        JourneyRuntime::builder()
            .registry(registry())
            .persistence(Arc::new(MemoryPersistence::new()))
            .build()
            .unwrap()
    }

    fn wizard_id() -> JourneyInstanceId {
        JourneyInstanceId::new("wizard", vec![], Some("abc123".to_string()))
    }

    #[test]
    fn test_builder_requires_persistence() {
        let err = JourneyRuntime::builder()
            .registry(registry())
            .build()
            .unwrap_err();
        assert_eq!(err, JourneyError::Config("persistence is required".to_string()));
    }

    #[test]
    fn test_concurrency_mode_parse() {
        assert_eq!(
            "optimistic".parse::<ConcurrencyMode>(),
            Ok(ConcurrencyMode::Optimistic)
        );
        assert_eq!(
            "Last-Writer-Wins".parse::<ConcurrencyMode>(),
            Ok(ConcurrencyMode::LastWriterWins)
        );
        assert!("eventual".parse::<ConcurrencyMode>().is_err());
    }

    #[tokio::test]
    async fn test_type_mismatch_never_returns_value() {
        let runtime = runtime();
        runtime
            .create_instance(wizard_id(), WizardStateV1 { step: 2 }, Properties::new())
            .await
            .unwrap();

        let err = runtime
            .get_instance::<WizardStateV2>(&wizard_id())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JourneyError::TypeMismatch {
                instance_id: "wizard#abc123".to_string(),
                expected: "wizard.v2".to_string(),
                actual: "wizard.v1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_existing() {
        let runtime = runtime();

        let (first, created) = runtime
            .get_or_create_instance(wizard_id(), || WizardStateV1 { step: 1 }, Properties::new())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.state().step, 1);

        let (second, created) = runtime
            .get_or_create_instance(wizard_id(), || WizardStateV1 { step: 99 }, Properties::new())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.state().step, 1);
    }

    #[tokio::test]
    async fn test_create_any_uses_descriptor_initial_state() {
        let runtime = runtime();
        let descriptor = runtime.registry().require("wizard").unwrap().clone();

        let (any, created) = runtime
            .create_any(&descriptor, wizard_id(), Properties::new())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(any.state_type().as_str(), "wizard.v1");

        let (again, created) = runtime
            .create_any(&descriptor, wizard_id(), Properties::new())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id(), any.id());
    }

    #[tokio::test]
    async fn test_override_state_on_completed_instance() {
        let runtime = runtime();
        let mut instance = runtime
            .create_instance(wizard_id(), WizardStateV1 { step: 5 }, Properties::new())
            .await
            .unwrap();
        instance.mark_completed().await.unwrap();

        runtime
            .override_state(&wizard_id(), &WizardStateV1 { step: 0 })
            .await
            .unwrap();

        let fresh = runtime
            .get_instance::<WizardStateV1>(&wizard_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.state().step, 0);
        assert!(fresh.is_completed());
    }

    struct StalledPersistence;

    #[async_trait::async_trait]
    impl Persistence for StalledPersistence {
        async fn create_instance(
            &self,
            _id: &JourneyInstanceId,
            _state: &SerializedState,
        ) -> Result<crate::persistence::InstanceRecord> {
            std::future::pending().await
        }

        async fn get_instance(
            &self,
            _id: &JourneyInstanceId,
            _state_type: &StateType,
        ) -> Result<Option<crate::persistence::InstanceRecord>> {
            std::future::pending().await
        }

        async fn update_instance_state(
            &self,
            _id: &JourneyInstanceId,
            _state: &SerializedState,
            _guard: UpdateGuard,
        ) -> Result<i64> {
            std::future::pending().await
        }

        async fn complete_instance(
            &self,
            _id: &JourneyInstanceId,
            _state_type: &StateType,
        ) -> Result<()> {
            std::future::pending().await
        }

        async fn delete_instance(
            &self,
            _id: &JourneyInstanceId,
            _state_type: &StateType,
        ) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout() {
        let runtime = JourneyRuntime::builder()
            .registry(registry())
            .persistence(Arc::new(StalledPersistence))
            .store_timeout(Some(Duration::from_millis(250)))
            .build()
            .unwrap();

        let err = runtime
            .get_instance::<WizardStateV1>(&wizard_id())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JourneyError::Timeout {
                operation: "get_instance".to_string(),
                timeout_ms: 250,
            }
        );
    }
}
