//! Catalog item repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use vitrina_core::{
    CreateItemRequest, EmbeddingVector, Error, Item, ItemFilter, ItemRepository, Result,
};

const ITEM_COLUMNS: &str = "id, branch_id, name, category, collection, photo, image_hash, \
     image_embedding, created_at, updated_at, deleted_at";

/// PostgreSQL implementation of ItemRepository.
#[derive(Clone)]
pub struct PgItemRepository {
    pool: Pool<Postgres>,
}

impl PgItemRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Execute a single-row update, mapping zero affected rows to `ItemNotFound`.
    async fn touch(&self, query: Query<'_, Postgres, PgArguments>, id: Uuid) -> Result<()> {
        let result = query.execute(&self.pool).await.map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::ItemNotFound(id));
        }
        Ok(())
    }
}

pub(crate) fn item_from_row(row: &PgRow) -> Item {
    Item {
        id: row.get("id"),
        branch_id: row.get("branch_id"),
        name: row.get("name"),
        category: row.get("category"),
        collection: row.get("collection"),
        photo: row.get("photo"),
        image_hash: row.get("image_hash"),
        image_embedding: row.get("image_embedding"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

#[async_trait]
impl ItemRepository for PgItemRepository {
    async fn insert(&self, req: CreateItemRequest) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO item (id, branch_id, name, category, collection, photo, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
        )
        .bind(id)
        .bind(req.branch_id)
        .bind(&req.name)
        .bind(&req.category)
        .bind(&req.collection)
        .bind(&req.photo)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "items",
            op = "insert",
            item_id = %id,
            "Item inserted"
        );
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Item>> {
        let row = sqlx::query(&format!("SELECT {} FROM item WHERE id = $1", ITEM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(item_from_row))
    }

    async fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {} FROM item
             WHERE ($1::uuid IS NULL OR branch_id = $1)
               AND ($2::text IS NULL OR category = $2)
               AND ($3::text IS NULL OR collection = $3)
               AND ($4 OR deleted_at IS NULL)
               AND (NOT $5 OR image_embedding IS NULL OR octet_length(image_embedding) = 0)
               AND (NOT $6 OR image_hash IS NULL)
             ORDER BY created_at, id
             LIMIT $7::bigint",
            ITEM_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(filter.branch_id)
            .bind(&filter.category)
            .bind(&filter.collection)
            .bind(filter.include_deleted)
            .bind(filter.missing_embedding)
            .bind(filter.missing_hash)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "items",
            op = "list",
            result_count = rows.len(),
            "Items listed"
        );
        Ok(rows.iter().map(item_from_row).collect())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let q = sqlx::query(
            "UPDATE item SET deleted_at = COALESCE(deleted_at, $2), updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now());
        self.touch(q, id).await
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        // item_sample rows go with it (ON DELETE CASCADE)
        let q = sqlx::query("DELETE FROM item WHERE id = $1").bind(id);
        self.touch(q, id).await
    }

    async fn set_primary_embedding(&self, id: Uuid, embedding: &EmbeddingVector) -> Result<()> {
        let q = sqlx::query("UPDATE item SET image_embedding = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(embedding.to_le_bytes())
            .bind(Utc::now());
        self.touch(q, id).await
    }

    async fn clear_primary_embedding(&self, id: Uuid) -> Result<()> {
        let q = sqlx::query("UPDATE item SET image_embedding = NULL, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now());
        self.touch(q, id).await
    }

    async fn set_image_hash(&self, id: Uuid, hash: &str) -> Result<()> {
        let q = sqlx::query("UPDATE item SET image_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(hash.to_string())
            .bind(Utc::now());
        self.touch(q, id).await
    }

    async fn clear_image_hash(&self, id: Uuid) -> Result<()> {
        let q = sqlx::query("UPDATE item SET image_hash = NULL, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now());
        self.touch(q, id).await
    }
}
