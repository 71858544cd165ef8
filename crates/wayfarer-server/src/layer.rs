// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-route middleware running the journey pipeline stages.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/wizard", get(start).journey(JourneyLayerState::activating(runtime.clone(), "wizard")))
//!     .route("/wizard/answer", post(answer).journey(JourneyLayerState::requiring(runtime, "wizard")));
//! ```
//!
//! Activating routes answer the first visit of a unique-key journey with a
//! `307 Temporary Redirect` to the same URL carrying the new key, so the method
//! and body are replayed. Requiring routes with no resolvable instance are
//! answered by the [`MissingInstancePolicy`] and never reach the handler.

use std::sync::Arc;

use axum::extract::{OriginalUri, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::MethodRouter;
use tracing::{debug, instrument};
use wayfarer_core::instance::AnyJourneyInstance;
use wayfarer_core::pipeline::{EndpointJourney, StageOutcome, run_stages};
use wayfarer_core::runtime::JourneyRuntime;

use crate::error::JourneyRejection;
use crate::params::RequestParameters;
use crate::policy::{MissingInstancePolicy, StatusCodePolicy};

/// Instance attached to a request by the middleware, read by extractors.
#[derive(Debug, Clone)]
pub struct AttachedJourney {
    pub(crate) runtime: JourneyRuntime,
    pub(crate) instance: AnyJourneyInstance,
}

impl AttachedJourney {
    /// The attached instance.
    pub fn instance(&self) -> &AnyJourneyInstance {
        &self.instance
    }
}

/// State for one route's journey middleware.
#[derive(Clone)]
pub struct JourneyLayerState {
    runtime: JourneyRuntime,
    endpoint: Arc<EndpointJourney>,
    policy: Arc<dyn MissingInstancePolicy>,
    missing_status: Option<StatusCode>,
}

impl std::fmt::Debug for JourneyLayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyLayerState")
            .field("endpoint", &self.endpoint)
            .field("missing_status", &self.missing_status)
            .finish()
    }
}

impl JourneyLayerState {
    /// Middleware state for `endpoint`, with the default missing-instance policy.
    pub fn new(runtime: JourneyRuntime, endpoint: EndpointJourney) -> Self {
        Self {
            runtime,
            endpoint: Arc::new(endpoint),
            policy: Arc::new(StatusCodePolicy::default()),
            missing_status: None,
        }
    }

    /// Entry route of `journey`: creates the instance on first visit.
    pub fn activating(runtime: JourneyRuntime, journey: &str) -> Self {
        Self::new(runtime, EndpointJourney::activating(journey))
    }

    /// Step route of `journey`: needs an existing instance.
    pub fn requiring(runtime: JourneyRuntime, journey: &str) -> Self {
        Self::new(runtime, EndpointJourney::requiring(journey))
    }

    /// Replace the missing-instance policy.
    pub fn policy(mut self, policy: Arc<dyn MissingInstancePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Status handed to the policy for this route.
    pub fn missing_status(mut self, status: StatusCode) -> Self {
        self.missing_status = Some(status);
        self
    }

    /// The endpoint marker.
    pub fn endpoint(&self) -> &EndpointJourney {
        &self.endpoint
    }
}

/// Run the stages for the route and either call the handler or answer directly.
#[instrument(skip_all, fields(journey = state.endpoint.journey(), path = %request.uri().path()))]
pub async fn journey_middleware(
    State(state): State<JourneyLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let values = RequestParameters::from_parts(&mut parts).await;

    let outcome = match run_stages(&state.runtime, &state.endpoint, &values).await {
        Ok(outcome) => outcome,
        Err(e) => return JourneyRejection::from(e).into_response(),
    };

    match outcome {
        StageOutcome::Continue(instance) => {
            if let Some(instance) = instance {
                parts.extensions.insert(AttachedJourney {
                    runtime: state.runtime.clone(),
                    instance,
                });
            }
            next.run(Request::from_parts(parts, body)).await
        }
        StageOutcome::Retry { parameter, value } => {
            let location = retry_location(&parts, &parameter, &value);
            debug!(%location, "Redirecting to attach unique key");
            Redirect::temporary(&location).into_response()
        }
        StageOutcome::Missing => {
            match state.runtime.registry().require(state.endpoint.journey()) {
                Ok(descriptor) => state.policy.respond(descriptor, &parts, state.missing_status),
                Err(e) => JourneyRejection::from(e).into_response(),
            }
        }
    }
}

/// The request URL with `parameter` set to `value`, replacing any earlier value.
fn retry_location(parts: &Parts, parameter: &str, value: &str) -> String {
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(&parts.uri);

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(existing) = uri.query() {
        for (k, v) in url::form_urlencoded::parse(existing.as_bytes()) {
            if k != parameter {
                query.append_pair(&k, &v);
            }
        }
    }
    query.append_pair(parameter, value);

    format!("{}?{}", uri.path(), query.finish())
}

/// Attach journey middleware to a route.
pub trait JourneyRouteExt {
    /// Run the journey stages described by `state` before this route's handler.
    fn journey(self, state: JourneyLayerState) -> Self;
}

impl<S> JourneyRouteExt for MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn journey(self, state: JourneyLayerState) -> Self {
        self.route_layer(middleware::from_fn_with_state(state, journey_middleware))
    }
}
