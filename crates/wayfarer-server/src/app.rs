// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Demonstration host: two journeys served over HTTP.
//!
//! | Route | Journey | Stage |
//! |-------|---------|-------|
//! | `GET /people/{personId}/profile` | `edit-profile` | activation |
//! | `POST /people/{personId}/profile` | `edit-profile` | enforcement |
//! | `POST /people/{personId}/profile/complete` | `edit-profile` | enforcement |
//! | `GET /wizard` | `wizard` | activation (unique key) |
//! | `POST /wizard/answers` | `wizard` | enforcement |
//! | `POST /wizard/finish` | `wizard` | enforcement |

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use wayfarer_core::descriptor::{DescriptorRegistry, JourneyDescriptor, JourneyState};
use wayfarer_core::error::{JourneyError, Result};
use wayfarer_core::instance::JourneyInstance;
use wayfarer_core::persistence::{
    MemoryPersistence, Persistence, PostgresPersistence, SqlitePersistence,
};
use wayfarer_core::runtime::JourneyRuntime;

use crate::error::JourneyRejection;
use crate::extract::CurrentJourney;
use crate::layer::{JourneyLayerState, JourneyRouteExt};
use crate::policy::MissingInstancePolicy;

/// Journey name for profile editing.
pub const EDIT_PROFILE: &str = "edit-profile";

/// Journey name for the onboarding wizard.
pub const WIZARD: &str = "wizard";

/// Profile edit state, keyed by person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileState {
    /// Number of saved edits.
    pub step: u32,
    /// Display name entered so far.
    pub display_name: Option<String>,
}

impl JourneyState for ProfileState {
    const STATE_TYPE: &'static str = "profile.v1";
}

/// Wizard state; each visit gets its own instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardState {
    /// Current step.
    pub step: u32,
    /// Answers collected so far.
    pub answers: Vec<String>,
}

impl JourneyState for WizardState {
    const STATE_TYPE: &'static str = "wizard.v1";
}

/// Registry holding the demonstration journeys.
pub fn registry(unique_key_param: &str) -> Result<DescriptorRegistry> {
    DescriptorRegistry::builder()
        .unique_key_param(unique_key_param)
        .register(JourneyDescriptor::new::<ProfileState>(EDIT_PROFILE).request_key("personId"))
        .register(JourneyDescriptor::new::<WizardState>(WIZARD).requires_unique_key(true))
        .build()
}

/// Open the store named by `database_url`, or an in-memory one.
pub async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn Persistence>> {
    match database_url {
        None => {
            info!("Using in-memory journey store");
            Ok(Arc::new(MemoryPersistence::new()))
        }
        Some(url) if url.starts_with("sqlite:") => {
            info!("Using SQLite journey store");
            Ok(Arc::new(SqlitePersistence::connect(url).await?))
        }
        Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
            info!("Using PostgreSQL journey store");
            Ok(Arc::new(PostgresPersistence::connect(url, 10).await?))
        }
        Some(_) => Err(JourneyError::Config(
            "database URL must start with sqlite: or postgres://".to_string(),
        )),
    }
}

/// What handlers return for an instance.
#[derive(Debug, Serialize)]
pub struct InstanceView<S> {
    /// Encoded instance id.
    pub instance_id: String,
    /// Whether this request created the instance.
    pub first_visit: bool,
    /// Whether the journey is completed.
    pub completed: bool,
    /// Current state version.
    pub version: i64,
    /// Current state.
    pub state: S,
}

impl<S: JourneyState> From<&JourneyInstance<S>> for InstanceView<S> {
    fn from(instance: &JourneyInstance<S>) -> Self {
        Self {
            instance_id: instance.id().encode(),
            first_visit: instance.was_activated(),
            completed: instance.is_completed(),
            version: instance.version(),
            state: instance.state().clone(),
        }
    }
}

/// Profile edit submitted by the client.
#[derive(Debug, Deserialize)]
pub struct ProfileEdit {
    /// New display name.
    pub display_name: String,
}

/// Wizard answer submitted by the client.
#[derive(Debug, Deserialize)]
pub struct WizardAnswer {
    /// The answer for the current step.
    pub answer: String,
}

type ViewResult<S> = std::result::Result<Json<InstanceView<S>>, JourneyRejection>;

async fn show_profile(journey: CurrentJourney<ProfileState>) -> ViewResult<ProfileState> {
    Ok(Json(InstanceView::from(&*journey)))
}

async fn edit_profile(
    mut journey: CurrentJourney<ProfileState>,
    Json(edit): Json<ProfileEdit>,
) -> ViewResult<ProfileState> {
    journey
        .update_state(|s| ProfileState {
            step: s.step + 1,
            display_name: Some(edit.display_name),
        })
        .await?;
    Ok(Json(InstanceView::from(&*journey)))
}

async fn complete_profile(mut journey: CurrentJourney<ProfileState>) -> ViewResult<ProfileState> {
    journey.mark_completed().await?;
    Ok(Json(InstanceView::from(&*journey)))
}

async fn show_wizard(journey: CurrentJourney<WizardState>) -> ViewResult<WizardState> {
    Ok(Json(InstanceView::from(&*journey)))
}

async fn answer_wizard(
    mut journey: CurrentJourney<WizardState>,
    Json(answer): Json<WizardAnswer>,
) -> ViewResult<WizardState> {
    journey
        .update_state(|mut s| {
            s.answers.push(answer.answer);
            s.step += 1;
            s
        })
        .await?;
    Ok(Json(InstanceView::from(&*journey)))
}

async fn finish_wizard(mut journey: CurrentJourney<WizardState>) -> ViewResult<WizardState> {
    journey.mark_completed().await?;
    Ok(Json(InstanceView::from(&*journey)))
}

async fn health() -> &'static str {
    "ok"
}

/// Build the demonstration router.
pub fn router(runtime: JourneyRuntime, policy: Arc<dyn MissingInstancePolicy>) -> Router {
    let activating = |journey: &str| {
        JourneyLayerState::activating(runtime.clone(), journey).policy(policy.clone())
    };
    let requiring = |journey: &str| {
        JourneyLayerState::requiring(runtime.clone(), journey).policy(policy.clone())
    };

    Router::new()
        .route("/health", get(health))
        .route(
            "/people/{personId}/profile",
            get(show_profile)
                .journey(activating(EDIT_PROFILE))
                .merge(post(edit_profile).journey(requiring(EDIT_PROFILE))),
        )
        .route(
            "/people/{personId}/profile/complete",
            post(complete_profile).journey(requiring(EDIT_PROFILE)),
        )
        .route("/wizard", get(show_wizard).journey(activating(WIZARD)))
        .route(
            "/wizard/answers",
            post(answer_wizard).journey(requiring(WIZARD)),
        )
        .route(
            "/wizard/finish",
            post(finish_wizard).journey(requiring(WIZARD)),
        )
}
