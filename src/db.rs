use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::batch_model::BatchFormulation;
use crate::batch_store::{BatchDocument, BatchRecord, BatchRepository};
use crate::store_errors::{StoreError, StoreResult};

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS batches (
            id BIGSERIAL PRIMARY KEY,
            batch_name TEXT NOT NULL,
            document JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create batches table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS batches_created_at_idx ON batches (created_at)")
        .execute(pool)
        .await
        .context("Failed to create batches index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Batch repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgBatchRepository {
    pool: PgPool,
}

impl PgBatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        init_database_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_id(id: &str) -> StoreResult<i64> {
    id.parse::<i64>()
        .map_err(|_| StoreError::NotFound(id.to_string()))
}

fn record_from_row(row: &PgRow) -> StoreResult<BatchRecord> {
    let id: i64 = row.try_get("id")?;
    let document: String = row.try_get("document")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at")?;

    let document: BatchDocument = serde_json::from_str(&document)?;
    Ok(BatchRecord {
        id: id.to_string(),
        batch: document.into(),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl BatchRepository for PgBatchRepository {
    async fn list(&self) -> StoreResult<Vec<BatchRecord>> {
        let rows = sqlx::query(
            "SELECT id, document::text AS document, created_at, updated_at
             FROM batches ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        info!("Listed {} batches", rows.len());
        rows.iter().map(record_from_row).collect()
    }

    async fn create(&self, batch: &BatchFormulation) -> StoreResult<BatchRecord> {
        info!("Creating batch record: {}", batch.name);
        let document = serde_json::to_string(&BatchDocument::from(batch))?;

        let row = sqlx::query(
            "INSERT INTO batches (batch_name, document) VALUES ($1, $2::jsonb)
             RETURNING id, created_at",
        )
        .bind(&batch.name)
        .bind(&document)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        info!("Batch record created with ID: {}", id);
        Ok(BatchRecord {
            id: id.to_string(),
            batch: batch.clone(),
            created_at: row.try_get("created_at")?,
            updated_at: None,
        })
    }

    async fn update(&self, id: &str, batch: &BatchFormulation) -> StoreResult<BatchRecord> {
        info!("Updating batch record {}: {}", id, batch.name);
        let row_id = parse_id(id)?;
        let document = serde_json::to_string(&BatchDocument::from(batch))?;

        let row = sqlx::query(
            "UPDATE batches SET batch_name = $1, document = $2::jsonb, updated_at = NOW()
             WHERE id = $3
             RETURNING created_at, updated_at",
        )
        .bind(&batch.name)
        .bind(&document)
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Ok(BatchRecord {
            id: id.to_string(),
            batch: batch.clone(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let Ok(row_id) = id.parse::<i64>() else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM batches WHERE id = $1")
            .bind(row_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        info!("Delete of batch record {}: {}", id, deleted);
        Ok(deleted)
    }
}
