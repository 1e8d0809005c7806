use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use crate::domain::repositories::StoreResult;
use crate::domain::{CatalogStore, ProductRecord, StoreError, StoredProduct, UpsertOutcome};

/// SQLite-backed product catalog keyed by (name, source)
#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: Arc<SqlitePool>,
}

impl SqliteCatalogStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> StoredProduct {
        StoredProduct {
            id: row.get("id"),
            image: row.get("image"),
            name: row.get("name"),
            price: row.get("price"),
            source: row.get("source"),
        }
    }

    async fn find_with(
        conn: &mut SqliteConnection,
        name: &str,
        source: &str,
    ) -> StoreResult<Option<StoredProduct>> {
        let row = sqlx::query("SELECT id, image, name, price, source FROM products WHERE name = ? AND source = ?")
            .bind(name)
            .bind(source)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(Self::map_row))
    }

    /// Lookup and write, run while the connection holds the write lock
    async fn upsert_locked(
        conn: &mut SqliteConnection,
        name: &str,
        record: &ProductRecord,
    ) -> StoreResult<UpsertOutcome> {
        match Self::find_with(conn, name, &record.source).await? {
            None => {
                sqlx::query("INSERT INTO products (image, name, price, source) VALUES (?, ?, ?, ?)")
                    .bind(&record.image)
                    .bind(name)
                    .bind(&record.price)
                    .bind(&record.source)
                    .execute(&mut *conn)
                    .await?;
                debug!("Inserted '{}' from {}", name, record.source);
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) if existing.matches(record) => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                sqlx::query("UPDATE products SET price = ?, image = ? WHERE id = ?")
                    .bind(&record.price)
                    .bind(&record.image)
                    .bind(existing.id)
                    .execute(&mut *conn)
                    .await?;
                debug!(
                    "Updated '{}' from {}: price {:?} -> {:?}",
                    name, record.source, existing.price, record.price
                );
                Ok(UpsertOutcome::Updated)
            }
        }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn find(&self, name: &str, source: &str) -> StoreResult<Option<StoredProduct>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_with(&mut conn, name, source).await
    }

    async fn upsert(&self, record: &ProductRecord) -> StoreResult<UpsertOutcome> {
        let name = record
            .storable_name()
            .ok_or_else(|| StoreError::invalid("product name is missing or blank"))?;
        if record.source.trim().is_empty() {
            return Err(StoreError::invalid("product source is blank"));
        }

        // IMMEDIATE takes the write lock up front so two writers cannot both
        // see "absent" and insert the same identity. Dropping the transaction
        // unfinished rolls it back before the connection is reused.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let outcome = Self::upsert_locked(&mut tx, name, record).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_all(&self) -> StoreResult<Vec<StoredProduct>> {
        let rows = sqlx::query("SELECT id, image, name, price, source FROM products ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&*self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
