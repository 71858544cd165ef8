// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract tests, run against every available backend.

mod common;

use common::*;
use wayfarer_core::descriptor::StateType;
use wayfarer_core::error::JourneyError;
use wayfarer_core::identity::JourneyInstanceId;
use wayfarer_core::instance::Properties;
use wayfarer_core::persistence::UpdateGuard;
use wayfarer_core::runtime::ConcurrencyMode;
use wayfarer_core::serializer::{JsonStateSerializer, SerializedState};

fn profile_id(person: &str) -> JourneyInstanceId {
    JourneyInstanceId::new(
        "edit-profile",
        vec![("personId".to_string(), person.to_string())],
        None,
    )
}

#[tokio::test]
async fn test_create_then_get() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();

        let created = store.create_instance(&id, &state).await.unwrap();
        assert_eq!(created.instance_id, id.encode(), "{}", name);
        assert_eq!(created.journey_name, "edit-profile", "{}", name);
        assert_eq!(created.version, 1, "{}", name);
        assert!(!created.completed, "{}", name);
        assert!(created.completed_at.is_none(), "{}", name);

        let read = store
            .get_instance(&id, &StateType::of::<ProfileState>())
            .await
            .unwrap()
            .expect("record exists");
        assert_eq!(read.serialized_state(), state, "{}", name);
    }
}

#[tokio::test]
async fn test_create_twice_is_already_exists() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();

        store.create_instance(&id, &state).await.unwrap();
        let err = store.create_instance(&id, &state).await.unwrap_err();
        assert_eq!(
            err,
            JourneyError::AlreadyExists {
                instance_id: id.encode()
            },
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_get_absent_is_none() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let read = store
            .get_instance(&id, &StateType::of::<ProfileState>())
            .await
            .unwrap();
        assert!(read.is_none(), "{}", name);
    }
}

#[tokio::test]
async fn test_get_with_other_state_type_is_mismatch() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state = SerializedState::from_state(&JsonStateSerializer, &WizardStateV1 { step: 4 })
            .unwrap();
        store.create_instance(&id, &state).await.unwrap();

        let err = store
            .get_instance(&id, &StateType::of::<WizardStateV2>())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_MISMATCH", "{}", name);
    }
}

#[tokio::test]
async fn test_update_bumps_version() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let initial = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();
        store.create_instance(&id, &initial).await.unwrap();

        let next = SerializedState::from_state(
            &JsonStateSerializer,
            &ProfileState {
                step: 1,
                display_name: Some("Ada".to_string()),
            },
        )
        .unwrap();
        let version = store
            .update_instance_state(&id, &next, UpdateGuard::default())
            .await
            .unwrap();
        assert_eq!(version, 2, "{}", name);

        let read = store
            .get_instance(&id, &StateType::of::<ProfileState>())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.serialized_state(), next, "{}", name);
        assert_eq!(read.version, 2, "{}", name);
    }
}

#[tokio::test]
async fn test_update_rejections() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();

        let err = store
            .update_instance_state(&id, &state, UpdateGuard::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND", "{}", name);

        store.create_instance(&id, &state).await.unwrap();

        let other = SerializedState::from_state(&JsonStateSerializer, &WizardStateV1::default())
            .unwrap();
        let err = store
            .update_instance_state(&id, &other, UpdateGuard::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_MISMATCH", "{}", name);

        let stale = UpdateGuard {
            expected_version: Some(7),
            allow_completed: false,
        };
        let err = store
            .update_instance_state(&id, &state, stale)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JourneyError::Conflict {
                instance_id: id.encode(),
                expected: 7,
                actual: 1,
            },
            "{}",
            name
        );

        store
            .complete_instance(&id, &StateType::of::<ProfileState>())
            .await
            .unwrap();
        let err = store
            .update_instance_state(&id, &state, UpdateGuard::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INSTANCE_COMPLETED", "{}", name);

        let admin = UpdateGuard {
            expected_version: None,
            allow_completed: true,
        };
        store
            .update_instance_state(&id, &state, admin)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state_type = StateType::of::<ProfileState>();
        let state = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();
        store.create_instance(&id, &state).await.unwrap();

        store.complete_instance(&id, &state_type).await.unwrap();
        let first = store.get_instance(&id, &state_type).await.unwrap().unwrap();
        assert!(first.completed, "{}", name);
        assert!(first.completed_at.is_some(), "{}", name);

        store.complete_instance(&id, &state_type).await.unwrap();
        let second = store.get_instance(&id, &state_type).await.unwrap().unwrap();
        assert!(second.completed, "{}", name);
        assert_eq!(second.completed_at, first.completed_at, "{}", name);

        let missing = profile_id(&unique_person());
        let err = store
            .complete_instance(&missing, &state_type)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND", "{}", name);
    }
}

#[tokio::test]
async fn test_delete_then_absent() {
    for (name, store) in backends().await {
        let id = profile_id(&unique_person());
        let state_type = StateType::of::<ProfileState>();
        let state = SerializedState::from_state(&JsonStateSerializer, &ProfileState::default())
            .unwrap();
        store.create_instance(&id, &state).await.unwrap();

        let err = store
            .delete_instance(&id, &StateType::of::<WizardStateV1>())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_MISMATCH", "{}", name);

        store.delete_instance(&id, &state_type).await.unwrap();
        assert!(store.get_instance(&id, &state_type).await.unwrap().is_none(), "{}", name);

        store.delete_instance(&id, &state_type).await.unwrap();

        // Identity can be reused after deletion.
        store.create_instance(&id, &state).await.unwrap();
    }
}

#[tokio::test]
async fn test_completed_flag_holds_until_delete() {
    for (name, store) in backends().await {
        let runtime = runtime(store, ConcurrencyMode::LastWriterWins);
        let id = profile_id(&unique_person());

        let mut instance = runtime
            .create_instance(id.clone(), ProfileState::default(), Properties::new())
            .await
            .unwrap();
        instance.mark_completed().await.unwrap();
        instance.mark_completed().await.unwrap();

        for _ in 0..3 {
            let read = runtime
                .get_instance::<ProfileState>(&id)
                .await
                .unwrap()
                .unwrap();
            assert!(read.is_completed(), "{}", name);
        }

        runtime.delete_instance::<ProfileState>(&id).await.unwrap();
        let (fresh, created) = runtime
            .get_or_create_instance(id.clone(), ProfileState::default, Properties::new())
            .await
            .unwrap();
        assert!(created, "{}", name);
        assert!(!fresh.is_completed(), "{}", name);
    }
}
