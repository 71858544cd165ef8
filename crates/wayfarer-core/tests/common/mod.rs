// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for wayfarer-core integration tests.
//!
//! Provides the journey state types, a registry, and the set of store
//! backends every contract test runs against.

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfarer_core::descriptor::{DescriptorRegistry, JourneyDescriptor, JourneyState};
use wayfarer_core::persistence::{
    MemoryPersistence, Persistence, PostgresPersistence, SqlitePersistence,
};
use wayfarer_core::runtime::{ConcurrencyMode, JourneyRuntime};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileState {
    pub step: u32,
    pub display_name: Option<String>,
}

impl JourneyState for ProfileState {
    const STATE_TYPE: &'static str = "profile.v1";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardStateV1 {
    pub step: u32,
}

impl JourneyState for WizardStateV1 {
    const STATE_TYPE: &'static str = "wizard.v1";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardStateV2 {
    pub step: u32,
    pub answers: Vec<String>,
}

impl JourneyState for WizardStateV2 {
    const STATE_TYPE: &'static str = "wizard.v2";
}

/// Registry with `edit-profile` (keyed by `personId`) and `wizard` (unique key).
pub fn registry() -> Arc<DescriptorRegistry> {
    Arc::new(
        DescriptorRegistry::builder()
            .register(JourneyDescriptor::new::<ProfileState>("edit-profile").request_key("personId"))
            .register(JourneyDescriptor::new::<WizardStateV1>("wizard").requires_unique_key(true))
            .build()
            .expect("test registry is valid"),
    )
}

pub fn runtime(persistence: Arc<dyn Persistence>, mode: ConcurrencyMode) -> JourneyRuntime {
    JourneyRuntime::builder()
        .registry(registry())
        .persistence(persistence)
        .concurrency(mode)
        .build()
        .expect("test runtime is valid")
}

/// Person id that does not collide across tests sharing a database.
pub fn unique_person() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Every backend available in this environment.
///
/// Memory and in-memory SQLite always; PostgreSQL when `TEST_DATABASE_URL` is set.
pub async fn backends() -> Vec<(&'static str, Arc<dyn Persistence>)> {
    let mut backends: Vec<(&'static str, Arc<dyn Persistence>)> = vec![
        ("memory", Arc::new(MemoryPersistence::new())),
        (
            "sqlite",
            Arc::new(
                SqlitePersistence::connect("sqlite::memory:")
                    .await
                    .expect("Failed to open in-memory SQLite"),
            ),
        ),
    ];

    if let Some(postgres) = postgres().await {
        backends.push(("postgres", Arc::new(postgres)));
    }

    backends
}

/// PostgreSQL backend from `TEST_DATABASE_URL`, if set and reachable.
pub async fn postgres() -> Option<PostgresPersistence> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    PostgresPersistence::connect(&database_url, 5).await.ok()
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
