// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, instrument};

use crate::descriptor::StateType;
use crate::error::{JourneyError, Result};
use crate::identity::JourneyInstanceId;
use crate::migrations;
use crate::serializer::SerializedState;

use super::{InstanceRecord, Persistence, UpdateGuard, ensure_state_type, update_rejection};

/// SQLite-backed persistence provider.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite URL (e.g. `sqlite::memory:` or `sqlite:app.db?mode=rwc`)
    /// and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        // An in-memory database exists per connection, so keep exactly one.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| {
                JourneyError::store("connect", format!("Failed to connect to {}: {}", url, e))
            })?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                JourneyError::store(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_record(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, journey_name, state_type, state, completed, version,
                   created_at, updated_at, completed_at
            FROM journey_instances
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    #[instrument(skip(self, id, state), fields(instance_id = %id))]
    async fn create_instance(
        &self,
        id: &JourneyInstanceId,
        state: &SerializedState,
    ) -> Result<InstanceRecord> {
        let now = Utc::now();
        let record = InstanceRecord {
            instance_id: id.encode(),
            journey_name: id.journey_name().to_string(),
            state_type: state.state_type.to_string(),
            state: state.payload.clone(),
            completed: false,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO journey_instances
                (instance_id, journey_name, state_type, state, completed, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5)
            "#,
        )
        .bind(&record.instance_id)
        .bind(&record.journey_name)
        .bind(&record.state_type)
        .bind(&record.state)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JourneyError::from_insert(&record.instance_id, e))?;

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
            SET state = ?1,
                version = version + 1,
                updated_at = ?2
            WHERE instance_id = ?3
              AND state_type = ?4
              AND (completed = 0 OR ?5)
              AND (?6 IS NULL OR version = ?6)
            RETURNING version
            "#,
        )
        .bind(&state.payload)
        .bind(Utc::now())
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
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE journey_instances
            SET completed = 1,
                completed_at = ?1,
                updated_at = ?1
            WHERE instance_id = ?2
              AND state_type = ?3
              AND completed = 0
            "#,
        )
        .bind(now)
        .bind(&instance_id)
        .bind(state_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Instance marked completed");
            return Ok(());
        }

        // Nothing changed: already completed, wrong type, or absent
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
            WHERE instance_id = ? AND state_type = ?
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
