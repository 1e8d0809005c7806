//! Catalog store contract
//!
//! The reconciliation driver only sees this trait; the SQLite
//! implementation lives in the infrastructure layer.

use async_trait::async_trait;
use thiserror::Error;

use super::product::{ProductRecord, StoredProduct, UpsertOutcome};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The record cannot be written (no usable name)
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up a product by its identity
    async fn find(&self, name: &str, source: &str) -> StoreResult<Option<StoredProduct>>;

    /// Insert, update or leave untouched, atomically with respect to other writers
    async fn upsert(&self, record: &ProductRecord) -> StoreResult<UpsertOutcome>;

    /// Every stored row, in id order
    async fn list_all(&self) -> StoreResult<Vec<StoredProduct>>;

    async fn count(&self) -> StoreResult<u64>;
}
