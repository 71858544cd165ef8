// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wayfarer Server - HTTP binding for journeys
//!
//! Binds the wayfarer-core pipeline stages to axum routes:
//!
//! - [`layer`]: per-route middleware. Activation creates or resolves the
//!   instance and redirects unique-key journeys to a URL carrying the new key;
//!   enforcement hands requests without an instance to the missing-instance
//!   policy.
//! - [`extract`]: `CurrentJourney<S>` binds the attached instance to the
//!   handler's state type.
//! - [`params`]: path and query parameters as request values.
//! - [`policy`]: missing-instance responses.
//! - [`app`]: demonstration journeys served by the `wayfarer-server` binary.

#![deny(missing_docs)]

pub mod app;
pub mod error;
pub mod extract;
pub mod layer;
pub mod params;
pub mod policy;

pub use error::JourneyRejection;
pub use extract::CurrentJourney;
pub use layer::{JourneyLayerState, JourneyRouteExt, journey_middleware};
pub use params::RequestParameters;
pub use policy::{MissingInstancePolicy, StatusCodePolicy};
