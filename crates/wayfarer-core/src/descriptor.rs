// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey descriptors and the process-wide descriptor registry.
//!
//! A descriptor names a journey kind, the shape of state it persists, and the
//! request values needed to identify one of its instances. Descriptors are
//! collected into a [`DescriptorRegistry`] once at startup; the registry is
//! immutable afterwards and is shared through an `Arc`.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;

/// Default request parameter that carries the unique key.
pub const DEFAULT_UNIQUE_KEY_PARAM: &str = "jid";

/// Tag identifying the shape of a journey's state.
///
/// Persisted next to the serialized state and compared on every read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateType(Cow<'static, str>);

impl StateType {
    /// Tag for a [`JourneyState`] type.
    pub fn of<S: JourneyState>() -> Self {
        Self(Cow::Borrowed(S::STATE_TYPE))
    }

    /// Tag from an arbitrary string (e.g. read back from the store).
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StateType {
    fn from(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }
}

/// State persisted by a journey.
///
/// `STATE_TYPE` must change whenever the shape changes incompatibly, so an
/// instance written with the old shape is rejected instead of half-decoded.
///
/// ```ignore
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct WizardState { step: u32 }
///
/// impl JourneyState for WizardState {
///     const STATE_TYPE: &'static str = "wizard.v1";
/// }
/// ```
pub trait JourneyState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type tag written alongside the state.
    const STATE_TYPE: &'static str;
}

type InitialStateFn = dyn Fn(&JourneyInstanceId) -> Result<serde_json::Value> + Send + Sync;

/// Static description of a journey kind.
#[derive(Clone)]
pub struct JourneyDescriptor {
    name: String,
    state_type: StateType,
    request_keys: Vec<String>,
    requires_unique_key: bool,
    initial_state: Arc<InitialStateFn>,
}

impl fmt::Debug for JourneyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JourneyDescriptor")
            .field("name", &self.name)
            .field("state_type", &self.state_type)
            .field("request_keys", &self.request_keys)
            .field("requires_unique_key", &self.requires_unique_key)
            .finish()
    }
}

impl JourneyDescriptor {
    /// Describe a journey whose instances start from `S::default()`.
    pub fn new<S: JourneyState + Default>(name: impl Into<String>) -> Self {
        Self::with_initial_state(name, |_id: &JourneyInstanceId| S::default())
    }

    /// Describe a journey whose initial state is derived from the new identity.
    pub fn with_initial_state<S, F>(name: impl Into<String>, initial: F) -> Self
    where
        S: JourneyState,
        F: Fn(&JourneyInstanceId) -> S + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            state_type: StateType::of::<S>(),
            request_keys: Vec::new(),
            requires_unique_key: false,
            initial_state: Arc::new(
                move |id: &JourneyInstanceId| -> Result<serde_json::Value> {
                    Ok(serde_json::to_value(initial(id))?)
                },
            ),
        }
    }

    /// Append a request key. Order is significant.
    pub fn request_key(mut self, key: impl Into<String>) -> Self {
        self.request_keys.push(key.into());
        self
    }

    /// Append several request keys, in order.
    pub fn request_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.request_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Require a server-generated unique key in every identity.
    pub fn requires_unique_key(mut self, required: bool) -> Self {
        self.requires_unique_key = required;
        self
    }

    /// Journey name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State type tag.
    pub fn state_type(&self) -> &StateType {
        &self.state_type
    }

    /// Ordered request key names.
    pub fn keys(&self) -> &[String] {
        &self.request_keys
    }

    /// Whether identities carry a unique key.
    pub fn unique_key_required(&self) -> bool {
        self.requires_unique_key
    }

    /// Initial state for a freshly created instance.
    pub fn initial_state(&self, id: &JourneyInstanceId) -> Result<serde_json::Value> {
        (self.initial_state)(id)
    }

    fn validate(&self, unique_key_param: &str) -> Result<()> {
        let invalid = |reason: String| JourneyError::InvalidDescriptor {
            journey: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for key in &self.request_keys {
            if key.is_empty() {
                return Err(invalid("request key names must not be empty".to_string()));
            }
            if key == unique_key_param {
                return Err(invalid(format!(
                    "request key '{}' collides with the unique key parameter",
                    key
                )));
            }
            if !seen.insert(key.as_str()) {
                return Err(invalid(format!("duplicate request key '{}'", key)));
            }
        }

        Ok(())
    }
}

/// Immutable catalog of journey descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, Arc<JourneyDescriptor>>,
    unique_key_param: String,
}

impl DescriptorRegistry {
    /// Start building a registry.
    pub fn builder() -> DescriptorRegistryBuilder {
        DescriptorRegistryBuilder::default()
    }

    /// Look up a descriptor by journey name.
    pub fn get(&self, name: &str) -> Option<&Arc<JourneyDescriptor>> {
        self.descriptors.get(name)
    }

    /// Look up a descriptor, failing with `UnknownJourney`.
    pub fn require(&self, name: &str) -> Result<&Arc<JourneyDescriptor>> {
        self.get(name)
            .ok_or_else(|| JourneyError::UnknownJourney(name.to_string()))
    }

    /// Request parameter name carrying the unique key.
    pub fn unique_key_param(&self) -> &str {
        &self.unique_key_param
    }

    /// Number of registered journeys.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no journeys are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterate over registered journey names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}

/// Builder for [`DescriptorRegistry`].
#[derive(Debug)]
pub struct DescriptorRegistryBuilder {
    descriptors: Vec<JourneyDescriptor>,
    unique_key_param: String,
}

impl Default for DescriptorRegistryBuilder {
    fn default() -> Self {
        Self {
            descriptors: Vec::new(),
            unique_key_param: DEFAULT_UNIQUE_KEY_PARAM.to_string(),
        }
    }
}

impl DescriptorRegistryBuilder {
    /// Add a descriptor.
    pub fn register(mut self, descriptor: JourneyDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Override the unique key parameter name.
    ///
    /// Default: `jid`
    pub fn unique_key_param(mut self, param: impl Into<String>) -> Self {
        self.unique_key_param = param.into();
        self
    }

    /// Validate all descriptors and freeze the registry.
    pub fn build(self) -> Result<DescriptorRegistry> {
        if self.unique_key_param.is_empty() {
            return Err(JourneyError::InvalidDescriptor {
                journey: String::new(),
                reason: "unique key parameter name must not be empty".to_string(),
            });
        }

        let mut descriptors = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            descriptor.validate(&self.unique_key_param)?;
            let name = descriptor.name.clone();
            if descriptors
                .insert(name.clone(), Arc::new(descriptor))
                .is_some()
            {
                return Err(JourneyError::InvalidDescriptor {
                    journey: name,
                    reason: "journey name is already registered".to_string(),
                });
            }
            debug!(journey = %name, "Journey registered");
        }

        Ok(DescriptorRegistry {
            descriptors,
            unique_key_param: self.unique_key_param,
        })
    }
}
