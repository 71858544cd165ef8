// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wayfarer Server - demonstration host for resumable journeys.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wayfarer_core::config::Config;
use wayfarer_core::runtime::JourneyRuntime;
use wayfarer_server::StatusCodePolicy;
use wayfarer_server::app;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wayfarer_server=info,wayfarer_core=info"));
    if std::env::var("WAYFARER_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Wayfarer Server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let backend = match config.database_url {
        Some(_) => "database",
        None => "memory",
    };
    info!(
        http_addr = %config.http_addr,
        backend,
        concurrency = ?config.concurrency,
        store_timeout = ?config.store_timeout,
        "Configuration loaded"
    );

    let persistence = app::open_store(config.database_url.as_deref()).await?;
    let registry = app::registry(&config.unique_key_param)?;

    let runtime = JourneyRuntime::builder()
        .registry(Arc::new(registry))
        .persistence(persistence)
        .concurrency(config.concurrency)
        .store_timeout(config.store_timeout)
        .build()?;

    let missing_status = StatusCode::from_u16(config.missing_instance_status)
        .context("invalid missing-instance status")?;
    let router = app::router(runtime, Arc::new(StatusCodePolicy::new(missing_status)))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "Wayfarer Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
