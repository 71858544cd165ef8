// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request pipeline stages.
//!
//! Two stages run ahead of host request handling, always in this order:
//!
//! 1. **Activation** (endpoints marked as activating a journey): resolve the
//!    instance named by the request, creating it on first visit. When the
//!    journey uses unique keys, a fresh instance is not handed to the handler;
//!    the stage yields [`StageOutcome::Retry`] so the client re-issues the
//!    request carrying the new key.
//! 2. **Enforcement** (endpoints marked as requiring an instance): reuse the
//!    instance from activation or resolve one; if none exists the outcome is
//!    [`StageOutcome::Missing`] and the handler must not run.
//!
//! Outcomes are transport-neutral. An HTTP host turns `Retry` into a redirect
//! and `Missing` into its missing-instance response.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::descriptor::JourneyDescriptor;
use crate::error::Result;
use crate::identity::{JourneyInstanceId, RequestValues};
use crate::instance::{ACTIVATED_PROPERTY, AnyJourneyInstance, Properties};
use crate::runtime::JourneyRuntime;

/// How an endpoint takes part in a journey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointJourney {
    journey: String,
    activates: bool,
    requires_instance: bool,
}

impl EndpointJourney {
    /// Endpoint bound to `journey`, with neither stage enabled.
    pub fn new(journey: impl Into<String>) -> Self {
        Self {
            journey: journey.into(),
            activates: false,
            requires_instance: false,
        }
    }

    /// Entry point that creates the instance on first visit.
    pub fn activating(journey: impl Into<String>) -> Self {
        Self::new(journey).activates(true).requires_instance(true)
    }

    /// Step that needs an existing instance.
    pub fn requiring(journey: impl Into<String>) -> Self {
        Self::new(journey).requires_instance(true)
    }

    /// Enable or disable activation.
    pub fn activates(mut self, enabled: bool) -> Self {
        self.activates = enabled;
        self
    }

    /// Enable or disable enforcement.
    pub fn requires_instance(mut self, enabled: bool) -> Self {
        self.requires_instance = enabled;
        self
    }

    /// Journey name.
    pub fn journey(&self) -> &str {
        &self.journey
    }

    /// Whether activation runs.
    pub fn is_activating(&self) -> bool {
        self.activates
    }

    /// Whether enforcement runs.
    pub fn is_requiring(&self) -> bool {
        self.requires_instance
    }
}

/// Result of the activation stage.
#[derive(Debug, Clone)]
pub enum ActivationOutcome {
    /// An instance is available for this request.
    Continue(AnyJourneyInstance),
    /// A new instance was created; the client must retry with `parameter=value`.
    Retry {
        /// Name of the unique key parameter.
        parameter: String,
        /// The freshly generated unique key.
        value: String,
    },
    /// The request does not carry the values needed to derive an identity.
    Skipped,
}

/// Result of the enforcement stage.
#[derive(Debug, Clone)]
pub enum EnforcementOutcome {
    /// The handler may run with this instance.
    Proceed(AnyJourneyInstance),
    /// No instance could be resolved.
    Missing,
}

/// Combined result of running the stages an endpoint is marked for.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// Run the handler, with the instance if one was resolved.
    Continue(Option<AnyJourneyInstance>),
    /// Re-issue the same request with `parameter=value` appended.
    Retry {
        /// Name of the unique key parameter.
        parameter: String,
        /// The freshly generated unique key.
        value: String,
    },
    /// Invoke the missing-instance policy; the handler must not run.
    Missing,
}

/// Activation stage.
#[instrument(skip_all, fields(journey = descriptor.name()))]
pub async fn activation_stage<V: RequestValues + ?Sized>(
    runtime: &JourneyRuntime,
    descriptor: &JourneyDescriptor,
    values: &V,
) -> Result<ActivationOutcome> {
    let unique_key_param = runtime.registry().unique_key_param();

    if let Some(id) = JourneyInstanceId::try_resolve(descriptor, unique_key_param, values)
        && let Some(existing) = runtime.get_any(descriptor, &id).await?
    {
        debug!(instance_id = %id, "Resolved existing instance");
        return Ok(ActivationOutcome::Continue(existing));
    }

    let Ok(id) = JourneyInstanceId::create(descriptor, values) else {
        debug!("Request lacks the keys to start this journey");
        return Ok(ActivationOutcome::Skipped);
    };

    let mut properties = Properties::new();
    properties.insert(ACTIVATED_PROPERTY.to_string(), Value::Bool(true));
    let (instance, _created) = runtime.create_any(descriptor, id, properties).await?;

    match instance.id().unique_key() {
        Some(uk) if descriptor.unique_key_required() => {
            debug!(instance_id = %instance.id(), "Instance created, client must retry with key");
            Ok(ActivationOutcome::Retry {
                parameter: unique_key_param.to_string(),
                value: uk.to_string(),
            })
        }
        _ => Ok(ActivationOutcome::Continue(instance)),
    }
}

/// Enforcement stage.
///
/// `attached` is the instance activation produced on this request, if any.
#[instrument(skip_all, fields(journey = descriptor.name()))]
pub async fn enforcement_stage<V: RequestValues + ?Sized>(
    runtime: &JourneyRuntime,
    descriptor: &JourneyDescriptor,
    values: &V,
    attached: Option<AnyJourneyInstance>,
) -> Result<EnforcementOutcome> {
    if let Some(instance) = attached {
        return Ok(EnforcementOutcome::Proceed(instance));
    }

    let unique_key_param = runtime.registry().unique_key_param();
    let Some(id) = JourneyInstanceId::try_resolve(descriptor, unique_key_param, values) else {
        debug!("No resolvable instance identity on request");
        return Ok(EnforcementOutcome::Missing);
    };

    match runtime.get_any(descriptor, &id).await? {
        Some(instance) => Ok(EnforcementOutcome::Proceed(instance)),
        None => {
            debug!(instance_id = %id, "Instance not found");
            Ok(EnforcementOutcome::Missing)
        }
    }
}

/// Run activation then enforcement, as marked on `endpoint`.
pub async fn run_stages<V: RequestValues + ?Sized>(
    runtime: &JourneyRuntime,
    endpoint: &EndpointJourney,
    values: &V,
) -> Result<StageOutcome> {
    let descriptor = runtime.registry().require(endpoint.journey())?;

    let mut attached = None;
    if endpoint.is_activating() {
        match activation_stage(runtime, descriptor, values).await? {
            ActivationOutcome::Continue(instance) => attached = Some(instance),
            ActivationOutcome::Retry { parameter, value } => {
                return Ok(StageOutcome::Retry { parameter, value });
            }
            ActivationOutcome::Skipped => {}
        }
    }

    if endpoint.is_requiring() {
        return match enforcement_stage(runtime, descriptor, values, attached).await? {
            EnforcementOutcome::Proceed(instance) => Ok(StageOutcome::Continue(Some(instance))),
            EnforcementOutcome::Missing => Ok(StageOutcome::Missing),
        };
    }

    Ok(StageOutcome::Continue(attached))
}
