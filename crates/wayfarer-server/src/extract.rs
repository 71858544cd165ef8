// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Extractor binding the attached instance to a handler's state type.

use std::ops::{Deref, DerefMut};

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use wayfarer_core::descriptor::JourneyState;
use wayfarer_core::instance::JourneyInstance;

use crate::error::JourneyRejection;
use crate::layer::AttachedJourney;

/// The journey instance of the current request, typed as `S`.
///
/// Rejects with `500` when the route attaches no instance or the instance
/// holds another state type. Use `Option<CurrentJourney<S>>` on routes where
/// an instance is not guaranteed.
#[derive(Debug, Clone)]
pub struct CurrentJourney<S>(pub JourneyInstance<S>);

impl<S> CurrentJourney<S> {
    /// Unwrap the instance handle.
    pub fn into_inner(self) -> JourneyInstance<S> {
        self.0
    }
}

impl<S> Deref for CurrentJourney<S> {
    type Target = JourneyInstance<S>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> DerefMut for CurrentJourney<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn bind<S: JourneyState>(attached: &AttachedJourney) -> Result<CurrentJourney<S>, JourneyRejection> {
    let instance = attached
        .instance
        .clone()
        .into_typed::<S>(&attached.runtime)?;
    Ok(CurrentJourney(instance))
}

impl<S, St> FromRequestParts<St> for CurrentJourney<S>
where
    S: JourneyState,
    St: Send + Sync,
{
    type Rejection = JourneyRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let attached = parts
            .extensions
            .get::<AttachedJourney>()
            .ok_or(JourneyRejection::NotAttached {
                expected: S::STATE_TYPE,
            })?;
        bind(attached)
    }
}

impl<S, St> OptionalFromRequestParts<St> for CurrentJourney<S>
where
    S: JourneyState,
    St: Send + Sync,
{
    type Rejection = JourneyRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &St,
    ) -> Result<Option<Self>, Self::Rejection> {
        parts
            .extensions
            .get::<AttachedJourney>()
            .map(bind::<S>)
            .transpose()
    }
}
