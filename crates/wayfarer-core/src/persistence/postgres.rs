// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.
//!
//! One row per instance; row-level locking in PostgreSQL serializes
//! concurrent writers of the same instance.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, instrument};

use crate::descriptor::StateType;
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::migrations;
use crate::serializer::SerializedState;

use super::{InstanceRecord, Persistence, UpdateGuard, ensure_state_type, update_rejection};

/// PostgreSQL-backed persistence provider.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new PostgreSQL persistence provider from an existing, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a PostgreSQL URL and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| JourneyError::store("connect", e))?;

        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_record(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, journey_name, state_type, state, completed, version,
                   created_at, updated_at, completed_at
            FROM journey_instances
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    async fn create_instance(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
    ) -> Result<InstanceRecord> {
        let instance_id = id.encode();

        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            INSERT INTO journey_instances
                (instance_id, journey_name, state_type, state, completed, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, 1, NOW(), NOW())
            RETURNING instance_id, journey_name, state_type, state, completed, version,
                      created_at, updated_at, completed_at
            "#,
        )
        .bind(&instance_id)
        .bind(id.journey_name())
        .bind(state.state_type.as_str())
        .bind(&state.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| JourneyError::from_insert(&instance_id, e))?;

        debug!("Instance record created");
        Ok(record)
    }

    async fn get_instance(
        &self,
        id: &JourneyInstanceId,
        state_type: &StateType,
    ) -> Result<Option<InstanceRecord>> {
        let record = self.fetch_record(&id.encode()).await?;
        if let Some(record) = &record {
            ensure_state_type(record, state_type)?;
        }
        Ok(record)
    }

    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    async fn update_instance_state(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
        guard: UpdateGuard,
    ) -> Result<i64> {
        let instance_id = id.encode();

        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE journey_instances
            SET state = $1,
                version = version + 1,
                updated_at = NOW()
            WHERE instance_id = $2
              AND state_type = $3
              AND ($4 OR completed = FALSE)
              AND ($5::BIGINT IS NULL OR version = $5)
            RETURNING version
            "#,
        )
        .bind(&state.payload)
        .bind(&instance_id)
        .bind(state.state_type.as_str())
        .bind(guard.allow_completed)
        .bind(guard.expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((version,)) => {
                debug!(version, "Instance state updated");
                Ok(version)
            }
            None => {
                let current = self.fetch_record(&instance_id).await?;
                Err(update_rejection(
                    &instance_id,
                    current.as_ref(),
                    &state.state_type,
                    guard,
                ))
            }
        }
    }

    #[instrument(skip(self, id), fields(instance_id = %id))]
    async fn complete_instance(
        &self,
        id: &JourneyInstanceId,
        state_type: &StateType,
    ) -> Result<()> {
        let instance_id = id.encode();

        let result = sqlx::query(
            r#"
            UPDATE journey_instances
            SET completed = TRUE,
                completed_at = $1,
                updated_at = $1
            WHERE instance_id = $2
              AND state_type = $3
              AND completed = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(&instance_id)
        .bind(state_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Instance marked completed");
            return Ok(());
        }

        match self.fetch_record(&instance_id).await? {
            Some(record) => ensure_state_type(&record, state_type),
            None => Err(JourneyError::NotFound { instance_id }),
        }
    }

    #[instrument(skip(self, id), fields(instance_id = %id))]
    async fn delete_instance(&self, id: &JourneyInstanceId, state_type: &StateType) -> Result<()> {
        let instance_id = id.encode();

        let result = sqlx::query(
            r#"
            DELETE FROM journey_instances
            WHERE instance_id = $1 AND state_type = $2
            "#,
        )
        .bind(&instance_id)
        .bind(state_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Instance record deleted");
            return Ok(());
        }

        match self.fetch_record(&instance_id).await? {
            Some(record) => ensure_state_type(&record, state_type),
            None => Ok(()),
        }
    }
}
