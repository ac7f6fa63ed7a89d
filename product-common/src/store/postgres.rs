use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use crate::product::{ProductRecord, ProductStatus};
use crate::store::{RecordStore, StoreError, StoreResult};

/// A row of the `products` table.
#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    fields: Json<Map<String, Value>>,
    status: Option<String>,
}

impl TryFrom<ProductRow> for ProductRecord {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .as_deref()
            .map(ProductStatus::from_str)
            .transpose()
            .map_err(|error| StoreError::InvalidRecord {
                id: row.id.clone(),
                reason: error.to_string(),
            })?;

        Ok(ProductRecord {
            id: row.id,
            status,
            fields: row.fields.0,
        })
    }
}

fn into_records(rows: Vec<ProductRow>) -> StoreResult<Vec<ProductRecord>> {
    rows.into_iter().map(ProductRecord::try_from).collect()
}

/// A RecordStore backed by the PostgreSQL `products` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    /// Replaces the full-scan query when listing every product.
    list_statement: Option<String>,
}

impl PgRecordStore {
    /// Initialize a new PgRecordStore connected to the database at `url`.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self {
            pool,
            list_statement: None,
        })
    }

    /// Initialize a PgRecordStore from an existing pool.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            list_statement: None,
        }
    }

    /// Use `statement` instead of the paged full scan in `list_all`.
    /// The statement takes no parameters and must return `id`, `fields` and `status` columns.
    pub fn with_list_statement(mut self, statement: Option<String>) -> Self {
        self.list_statement = statement.filter(|s| !s.trim().is_empty());
        self
    }

    /// Apply the migrations shipped with this workspace.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "MIGRATE".to_owned(),
                error: error.into(),
            })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(&self, id: &str) -> StoreResult<Option<ProductRecord>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
SELECT
    id, fields, status
FROM
    products
WHERE
    id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        row.map(ProductRecord::try_from).transpose()
    }

    async fn upsert(&self, record: &ProductRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO products
    (id, fields, status, created_at, updated_at)
VALUES
    ($1, $2, $3, NOW(), NOW())
ON CONFLICT (id) DO UPDATE
SET
    fields = EXCLUDED.fields,
    status = EXCLUDED.status,
    updated_at = NOW()
            "#,
        )
        .bind(&record.id)
        .bind(Json(&record.fields))
        .bind(record.status.map(|status| status.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn query_by_status_page(
        &self,
        statuses: &[ProductStatus],
        after: Option<&str>,
        limit: u32,
    ) -> StoreResult<Vec<ProductRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_owned()).collect();

        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"
SELECT
    id, fields, status
FROM
    products
WHERE
    status = ANY($1)
    AND ($2::text IS NULL OR id > $2)
ORDER BY
    id
LIMIT $3
            "#,
        )
        .bind(statuses)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        into_records(rows)
    }

    async fn list_page(&self, after: Option<&str>, limit: u32) -> StoreResult<Vec<ProductRecord>> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"
SELECT
    id, fields, status
FROM
    products
WHERE
    ($1::text IS NULL OR id > $1)
ORDER BY
    id
LIMIT $2
            "#,
        )
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        into_records(rows)
    }

    async fn list_all(&self) -> StoreResult<Vec<ProductRecord>> {
        let Some(statement) = &self.list_statement else {
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
        };

        let rows: Vec<ProductRow> = sqlx::query_as(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "LIST".to_owned(),
                error,
            })?;

        into_records(rows)
    }
}
