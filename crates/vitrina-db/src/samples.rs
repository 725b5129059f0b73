//! Item sample repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use vitrina_core::{EmbeddingVector, Error, Result, Sample, SampleRepository};

/// PostgreSQL implementation of SampleRepository.
#[derive(Clone)]
pub struct PgSampleRepository {
    pool: Pool<Postgres>,
}

impl PgSampleRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SampleRepository for PgSampleRepository {
    async fn list_for_items(&self, item_ids: &[Uuid]) -> Result<Vec<Sample>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, item_id, embedding, created_at
             FROM item_sample
             WHERE item_id = ANY($1)
             ORDER BY created_at, id",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Sample {
                id: row.get("id"),
                item_id: row.get("item_id"),
                embedding: row.get("embedding"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn insert(&self, item_id: Uuid, embedding: &EmbeddingVector) -> Result<Sample> {
        let sample = Sample {
            id: Uuid::now_v7(),
            item_id,
            embedding: embedding.to_le_bytes(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO item_sample (id, item_id, embedding, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(sample.id)
        .bind(sample.item_id)
        .bind(&sample.embedding)
        .bind(sample.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                Error::ItemNotFound(item_id)
            }
            other => Error::Database(other),
        })?;

        Ok(sample)
    }

    async fn count_for_item(&self, item_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_sample WHERE item_id = $1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}
