// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Responses for requests whose required journey instance does not exist.

use axum::Json;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use wayfarer_core::descriptor::JourneyDescriptor;

/// Builds the response for a request that needs an instance and has none.
///
/// `status` is the per-route override, if one was configured. Any
/// `Fn(&JourneyDescriptor, &Parts, Option<StatusCode>) -> Response` closure
/// is a policy.
pub trait MissingInstancePolicy: Send + Sync + 'static {
    /// Produce the response. Called at most once per request.
    fn respond(
        &self,
        descriptor: &JourneyDescriptor,
        parts: &Parts,
        status: Option<StatusCode>,
    ) -> Response;
}

impl<F> MissingInstancePolicy for F
where
    F: Fn(&JourneyDescriptor, &Parts, Option<StatusCode>) -> Response + Send + Sync + 'static,
{
    fn respond(
        &self,
        descriptor: &JourneyDescriptor,
        parts: &Parts,
        status: Option<StatusCode>,
    ) -> Response {
        self(descriptor, parts, status)
    }
}

#[derive(Debug, Serialize)]
struct MissingInstanceBody<'a> {
    message: String,
    code: &'static str,
    journey: &'a str,
}

/// Default policy: a fixed client-error status with a JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodePolicy {
    status: StatusCode,
}

impl StatusCodePolicy {
    /// Respond with `status` unless a route overrides it.
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// The status used when no route override is given.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl Default for StatusCodePolicy {
    fn default() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }
}

impl MissingInstancePolicy for StatusCodePolicy {
    fn respond(
        &self,
        descriptor: &JourneyDescriptor,
        _parts: &Parts,
        status: Option<StatusCode>,
    ) -> Response {
        let body = MissingInstanceBody {
            message: format!("No active '{}' journey for this request", descriptor.name()),
            code: "JOURNEY_INSTANCE_MISSING",
            journey: descriptor.name(),
        };
        (status.unwrap_or(self.status), Json(body)).into_response()
    }
}
