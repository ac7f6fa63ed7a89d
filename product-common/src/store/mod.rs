//! The record store: durable keyed collection of product documents and their outbox status.

use async_trait::async_trait;
use thiserror::Error;

use crate::product::{ProductRecord, ProductStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

/// Number of records fetched per page when draining a scan.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Enumeration of errors for operations with a RecordStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("stored product {id} is invalid: {reason}")]
    InvalidRecord { id: String, reason: String },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point lookup by id.
    async fn get(&self, id: &str) -> StoreResult<Option<ProductRecord>>;

    /// Insert the record or replace the stored one with the same id.
    async fn upsert(&self, record: &ProductRecord) -> StoreResult<()>;

    /// One page of records whose status is in `statuses`, ordered by id, starting after `after`.
    async fn query_by_status_page(
        &self,
        statuses: &[ProductStatus],
        after: Option<&str>,
        limit: u32,
    ) -> StoreResult<Vec<ProductRecord>>;

    /// One page of all records, ordered by id, starting after `after`.
    async fn list_page(&self, after: Option<&str>, limit: u32) -> StoreResult<Vec<ProductRecord>>;

    fn page_size(&self) -> u32 {
        DEFAULT_PAGE_SIZE
    }

    /// Every record whose status is in `statuses`, draining all pages.
    async fn query_by_status(&self, statuses: &[ProductStatus]) -> StoreResult<Vec<ProductRecord>> {
        let limit = self.page_size();
        let mut records = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .query_by_status_page(statuses, after.as_deref(), limit)
                .await?;
            let exhausted = page.len() < limit as usize;
            after = page.last().map(|record| record.id.clone());
            records.extend(page);

            if exhausted || after.is_none() {
                return Ok(records);
            }
        }
    }

    /// Every record in the store, draining all pages.
    async fn list_all(&self) -> StoreResult<Vec<ProductRecord>> {
        let limit = self.page_size();
        let mut records = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.list_page(after.as_deref(), limit).await?;
            let exhausted = page.len() < limit as usize;
            after = page.last().map(|record| record.id.clone());
            records.extend(page);

            if exhausted || after.is_none() {
                return Ok(records);
            }
        }
    }
}
