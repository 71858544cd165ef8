// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::descriptor::DEFAULT_UNIQUE_KEY_PARAM;
use crate::runtime::ConcurrencyMode;

/// Wayfarer configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite or PostgreSQL connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Request parameter carrying the unique key
    pub unique_key_param: String,
    /// How concurrent writes to one instance are reconciled
    pub concurrency: ConcurrencyMode,
    /// Per-operation store timeout
    pub store_timeout: Option<Duration>,
    /// Status returned when a required instance is missing
    pub missing_instance_status: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `WAYFARER_DATABASE_URL`: `sqlite:` or `postgres://` URL (default: in-memory store)
    /// - `WAYFARER_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `WAYFARER_UNIQUE_KEY_PARAM`: unique key parameter name (default: jid)
    /// - `WAYFARER_CONCURRENCY`: `last-writer-wins` or `optimistic` (default: last-writer-wins)
    /// - `WAYFARER_STORE_TIMEOUT_MS`: store timeout in ms, 0 disables (default: 5000)
    /// - `WAYFARER_MISSING_INSTANCE_STATUS`: 4xx status for missing instances (default: 404)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("WAYFARER_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        if let Some(url) = &database_url
            && !(url.starts_with("sqlite:")
                || url.starts_with("postgres://")
                || url.starts_with("postgresql://"))
        {
            return Err(ConfigError::Invalid(
                "WAYFARER_DATABASE_URL",
                "must be a sqlite: or postgres:// URL",
            ));
        }

        let http_port: u16 = std::env::var("WAYFARER_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("WAYFARER_HTTP_PORT", "must be a valid port number")
            })?;

        let unique_key_param = std::env::var("WAYFARER_UNIQUE_KEY_PARAM")
            .unwrap_or_else(|_| DEFAULT_UNIQUE_KEY_PARAM.to_string());
        if unique_key_param.is_empty() {
            return Err(ConfigError::Invalid(
                "WAYFARER_UNIQUE_KEY_PARAM",
                "must not be empty",
            ));
        }

        let concurrency: ConcurrencyMode = std::env::var("WAYFARER_CONCURRENCY")
            .unwrap_or_else(|_| "last-writer-wins".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "WAYFARER_CONCURRENCY",
                    "must be last-writer-wins or optimistic",
                )
            })?;

        let store_timeout_ms: u64 = std::env::var("WAYFARER_STORE_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "WAYFARER_STORE_TIMEOUT_MS",
                    "must be a non-negative integer",
                )
            })?;

        let missing_instance_status: u16 = std::env::var("WAYFARER_MISSING_INSTANCE_STATUS")
            .unwrap_or_else(|_| "404".to_string())
            .parse()
            .ok()
            .filter(|status| (400..500).contains(status))
            .ok_or(ConfigError::Invalid(
                "WAYFARER_MISSING_INSTANCE_STATUS",
                "must be a 4xx status code",
            ))?;

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            unique_key_param,
            concurrency,
            store_timeout: (store_timeout_ms > 0).then(|| Duration::from_millis(store_timeout_ms)),
            missing_instance_status,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
