// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-path errors and their HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};
use wayfarer_core::error::JourneyError;

/// Errors raised while binding a request to its journey or running a handler.
#[derive(Debug, thiserror::Error)]
pub enum JourneyRejection {
    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] JourneyError),

    /// The handler asked for an instance but the route attaches none.
    #[error("No journey instance attached to this request (expected state '{expected}')")]
    NotAttached {
        /// State type the handler asked for.
        expected: &'static str,
    },
}

impl JourneyRejection {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAttached { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(err) => match err {
                JourneyError::IdentityNotResolvable { .. } | JourneyError::InvalidIdentity { .. } => {
                    StatusCode::BAD_REQUEST
                }
                JourneyError::NotFound { .. } => StatusCode::NOT_FOUND,
                JourneyError::AlreadyExists { .. }
                | JourneyError::InstanceCompleted { .. }
                | JourneyError::Conflict { .. } => StatusCode::CONFLICT,
                JourneyError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                JourneyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable error code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAttached { .. } => "JOURNEY_NOT_ATTACHED",
            Self::Engine(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

impl IntoResponse for JourneyRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.error_code(), error = %self, "Journey request failed");
        } else {
            debug!(code = self.error_code(), error = %self, "Journey request rejected");
        }

        let body = Json(ErrorBody {
            message: self.to_string(),
            code: self.error_code(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (
                JourneyRejection::NotAttached { expected: "wizard.v1" },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                JourneyError::TypeMismatch {
                    instance_id: "wizard#abc".to_string(),
                    expected: "wizard.v2".to_string(),
                    actual: "wizard.v1".to_string(),
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                JourneyError::InstanceCompleted {
                    instance_id: "wizard#abc".to_string(),
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                JourneyError::Conflict {
                    instance_id: "wizard#abc".to_string(),
                    expected: 1,
                    actual: 2,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                JourneyError::Timeout {
                    operation: "get_instance".to_string(),
                    timeout_ms: 100,
                }
                .into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                JourneyError::StoreUnavailable {
                    operation: "insert".to_string(),
                    details: "down".to_string(),
                }
                .into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (rejection, expected) in cases {
            assert_eq!(rejection.status(), expected, "{:?}", rejection);
            assert_eq!(rejection.into_response().status(), expected);
        }
    }

    #[test]
    fn test_error_code_passthrough() {
        let rejection = JourneyRejection::from(JourneyError::UnknownJourney("x".to_string()));
        assert_eq!(rejection.error_code(), "UNKNOWN_JOURNEY");
        assert_eq!(rejection.to_string(), "Unknown journey 'x'");
    }
}
