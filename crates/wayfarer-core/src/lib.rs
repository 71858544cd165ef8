// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wayfarer Core - Resumable Journey Engine
//!
//! A journey is a multi-step interaction (a wizard, an edit flow) whose state
//! survives across independent requests. This crate names journey instances
//! from request values, persists their type-tagged state, and runs the
//! pipeline stages that create or require an instance before host code runs.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                 Host (wayfarer-server, axum)                │
//! │      request values ──► pipeline stages ──► handler         │
//! └────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                     JourneyRuntime                          │
//! │  DescriptorRegistry · StateSerializer · ConcurrencyMode     │
//! └────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌──────────────┬──────────────────┬──────────────────────────┐
//! │    Memory    │      SQLite      │        PostgreSQL        │
//! │  (DashMap)   │     (sqlx)       │          (sqlx)          │
//! └──────────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! # Instance identity
//!
//! An instance id is the journey name, the values of the descriptor's request
//! keys, and optionally a generated unique key:
//!
//! ```text
//! edit-profile?personId=42
//! wizard#3f2b9c0d7a4e4e1f9b6a1c2d3e4f5a6b
//! ```
//!
//! Components are percent-encoded, so the encoding round-trips for any value.
//!
//! # Pipeline
//!
//! | Stage | Runs on | Outcome |
//! |-------|---------|---------|
//! | Activation | entry endpoints | existing or new instance; `Retry` for unique-key journeys |
//! | Enforcement | step endpoints | instance, or `Missing` |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WAYFARER_DATABASE_URL` | No | memory | SQLite or PostgreSQL connection string |
//! | `WAYFARER_HTTP_PORT` | No | `8080` | HTTP server port |
//! | `WAYFARER_UNIQUE_KEY_PARAM` | No | `jid` | Unique key parameter name |
//! | `WAYFARER_CONCURRENCY` | No | `last-writer-wins` | Or `optimistic` |
//! | `WAYFARER_STORE_TIMEOUT_MS` | No | `5000` | Store timeout, `0` disables |
//! | `WAYFARER_MISSING_INSTANCE_STATUS` | No | `404` | Missing-instance status |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Journey descriptors and the registry they are looked up in.
pub mod descriptor;

/// Error types with stable error codes.
pub mod error;

/// Instance identity derived from request values.
pub mod identity;

/// Typed and untyped journey instance handles.
pub mod instance;

/// Embedded database migrations.
pub mod migrations;

/// Instance store backends.
pub mod persistence;

/// Activation and enforcement stages.
pub mod pipeline;

/// Runtime tying registry, store and serializer together.
pub mod runtime;

/// Type-tagged state serialization.
pub mod serializer;

pub use descriptor::{DescriptorRegistry, JourneyDescriptor, JourneyState, StateType};
pub use error::{JourneyError, Result};
pub use identity::{JourneyInstanceId, RequestValues};
pub use instance::{ACTIVATED_PROPERTY, AnyJourneyInstance, JourneyInstance, Properties};
pub use pipeline::{EndpointJourney, StageOutcome};
pub use runtime::{ConcurrencyMode, JourneyRuntime};
