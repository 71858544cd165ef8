// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for wayfarer-core.
//!
//! Every engine operation returns a typed outcome; none of these messages are
//! meant to be shown to end users. Hosts map them to responses through their
//! own policies.

use thiserror::Error;

/// Result type using JourneyError
pub type Result<T> = std::result::Result<T, JourneyError>;

/// Errors produced by the journey engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum JourneyError {
    /// The request does not carry enough values to identify an instance.
    #[error("Journey '{journey}' instance could not be resolved from the request")]
    IdentityNotResolvable {
        /// Journey name.
        journey: String,
    },

    /// An instance with this identity already exists.
    #[error("Instance '{instance_id}' already exists")]
    AlreadyExists {
        /// Canonical instance id.
        instance_id: String,
    },

    /// The stored state type differs from the one requested.
    #[error("Instance '{instance_id}' holds state '{actual}', requested '{expected}'")]
    TypeMismatch {
        /// Canonical instance id.
        instance_id: String,
        /// State type requested by the caller.
        expected: String,
        /// State type recorded in the store.
        actual: String,
    },

    /// Instance was not found in the store.
    #[error("Instance '{instance_id}' not found")]
    NotFound {
        /// Canonical instance id.
        instance_id: String,
    },

    /// Instance is completed and its state can no longer change.
    #[error("Instance '{instance_id}' is completed")]
    InstanceCompleted {
        /// Canonical instance id.
        instance_id: String,
    },

    /// Optimistic version check failed.
    #[error("Instance '{instance_id}' was modified concurrently: expected version {expected}, found {actual}")]
    Conflict {
        /// Canonical instance id.
        instance_id: String,
        /// Version the writer last observed.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// The backing store failed.
    #[error("Store unavailable during '{operation}': {details}")]
    StoreUnavailable {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A store operation exceeded the configured timeout.
    #[error("Store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// State could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No descriptor is registered under this name.
    #[error("Unknown journey '{0}'")]
    UnknownJourney(String),

    /// A descriptor failed validation at registration.
    #[error("Invalid descriptor '{journey}': {reason}")]
    InvalidDescriptor {
        /// Journey name.
        journey: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The runtime was assembled with missing or invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An encoded instance id could not be decoded.
    #[error("Invalid instance id '{encoded}': {reason}")]
    InvalidIdentity {
        /// The offending encoded value.
        encoded: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl JourneyError {
    /// Stable, machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::IdentityNotResolvable { .. } => "IDENTITY_NOT_RESOLVABLE",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InstanceCompleted { .. } => "INSTANCE_COMPLETED",
            Self::Conflict { .. } => "CONFLICT",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UnknownJourney(_) => "UNKNOWN_JOURNEY",
            Self::InvalidDescriptor { .. } => "INVALID_DESCRIPTOR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidIdentity { .. } => "INVALID_IDENTITY",
        }
    }

    /// Whether this is a normal outcome of request handling rather than a fault.
    ///
    /// Expected errors are logged at `debug` level.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::IdentityNotResolvable { .. } | Self::AlreadyExists { .. } | Self::NotFound { .. }
        )
    }

    /// Whether the host may re-read and retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout { .. })
    }

    pub(crate) fn store(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }

    /// Map a database error, recognising unique-key violations on insert.
    pub(crate) fn from_insert(instance_id: &str, err: sqlx::Error) -> Self {
        let unique_violation = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);

        if unique_violation {
            Self::AlreadyExists {
                instance_id: instance_id.to_string(),
            }
        } else {
            Self::from(err)
        }
    }
}

impl From<sqlx::Error> for JourneyError {
    fn from(err: sqlx::Error) -> Self {
        JourneyError::store("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for JourneyError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        JourneyError::store("migrate", err)
    }
}

impl From<serde_json::Error> for JourneyError {
    fn from(err: serde_json::Error) -> Self {
        JourneyError::Serialization(err.to_string())
    }
}
