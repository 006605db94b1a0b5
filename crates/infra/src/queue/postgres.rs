//! Postgres-backed queue store.
//!
//! Pending and dead-lettered records live in two tables whose names come from
//! [`QueueTables`]. Payloads and failure details are `JSONB`; payloads are bound
//! and read back as text so the stored JSON stays the single source of truth.
//!
//! ## Error Mapping
//!
//! | SQLx Error | QueueStoreError | Scenario |
//! |------------|-----------------|----------|
//! | RowNotFound | `NotFound` | Update/delete of an id that is gone |
//! | Database | `Storage` | Constraint violations, bad SQL |
//! | PoolClosed | `Storage` | Connection pool was closed |
//! | Other | `Storage` | Network errors, decoding errors, etc. |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use eventide_core::{FailedRecordId, QueueRecordId};

use super::store::{QueueStats, QueueStore, QueueStoreError};
use super::types::{FailedRecord, FailureDetails, NewFailedRecord, NewQueueRecord, QueueRecord};
use crate::config::QueueTables;

/// Queue store on top of a sqlx Postgres pool.
///
/// Single-statement writes only; the store adds no locking of its own.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
    tables: QueueTables,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool, tables: QueueTables) -> Self {
        Self {
            pool: Arc::new(pool),
            tables,
        }
    }

    pub fn tables(&self) -> &QueueTables {
        &self.tables
    }

    /// Create both tables (and the FIFO index) if they do not exist yet.
    #[instrument(skip(self), fields(queue_table = %self.tables.queue(), failed_table = %self.tables.failed()), err)]
    pub async fn ensure_schema(&self) -> Result<(), QueueStoreError> {
        let queue = self.tables.queue();
        let failed = self.tables.failed();

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {queue} (
                    id          UUID PRIMARY KEY,
                    queue_name  TEXT NOT NULL,
                    event_name  TEXT NOT NULL,
                    payload     JSONB NOT NULL,
                    attempt     INTEGER NOT NULL DEFAULT 0 CHECK (attempt >= 0),
                    retries     INTEGER NOT NULL CHECK (retries >= 0),
                    created_at  TIMESTAMPTZ NOT NULL
                )
                "#
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {queue}_fifo_idx ON {queue} (queue_name, created_at, id)"
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {failed} (
                    id          UUID PRIMARY KEY,
                    queue_name  TEXT NOT NULL,
                    event_name  TEXT NOT NULL,
                    payload     JSONB NOT NULL,
                    error       JSONB NOT NULL,
                    failed_at   TIMESTAMPTZ NOT NULL
                )
                "#
            ),
        ];

        for sql in &statements {
            sqlx::query(sql)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(skip(self, record), fields(queue = %record.queue_name, event = %record.event_name), err)]
    async fn insert(&self, record: NewQueueRecord) -> Result<QueueRecord, QueueStoreError> {
        let record = record.into_record(QueueRecordId::new());
        let sql = format!(
            "INSERT INTO {} (id, queue_name, event_name, payload, attempt, retries, created_at) \
             VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7)",
            self.tables.queue()
        );

        sqlx::query(&sql)
            .bind(record.id.as_uuid())
            .bind(&record.queue_name)
            .bind(&record.event_name)
            .bind(&record.payload)
            .bind(to_db_int("attempt", record.attempt)?)
            .bind(to_db_int("retries", record.retries)?)
            .bind(record.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_many(&self, queue_name: &str) -> Result<Vec<QueueRecord>, QueueStoreError> {
        let sql = format!(
            "SELECT id, queue_name, event_name, payload::text AS payload, attempt, retries, created_at \
             FROM {} WHERE queue_name = $1 ORDER BY created_at ASC, id ASC",
            self.tables.queue()
        );

        let rows = sqlx::query(&sql)
            .bind(queue_name)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_many", e))?;

        rows.iter()
            .map(|row| {
                QueueRecordRow::from_row(row)
                    .map_err(|e| map_sqlx_error("find_many", e))
                    .and_then(QueueRecord::try_from)
            })
            .collect()
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, attempt = record.attempt), err)]
    async fn update(&self, record: &QueueRecord) -> Result<(), QueueStoreError> {
        let sql = format!(
            "UPDATE {} SET attempt = $2, retries = $3 WHERE id = $1",
            self.tables.queue()
        );

        let result = sqlx::query(&sql)
            .bind(record.id.as_uuid())
            .bind(to_db_int("attempt", record.attempt)?)
            .bind(to_db_int("retries", record.retries)?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn delete(&self, id: QueueRecordId) -> Result<(), QueueStoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.queue());
        let result = sqlx::query(&sql)
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, record), fields(queue = %record.queue_name, event = %record.event_name), err)]
    async fn insert_failed(
        &self,
        record: NewFailedRecord,
    ) -> Result<FailedRecord, QueueStoreError> {
        let record = record.into_record(FailedRecordId::new());
        let sql = format!(
            "INSERT INTO {} (id, queue_name, event_name, payload, error, failed_at) \
             VALUES ($1, $2, $3, $4::jsonb, $5, $6)",
            self.tables.failed()
        );

        sqlx::query(&sql)
            .bind(record.id.as_uuid())
            .bind(&record.queue_name)
            .bind(&record.event_name)
            .bind(&record.payload)
            .bind(Json(&record.error))
            .bind(record.failed_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_failed", e))?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_failed(&self, queue_name: &str) -> Result<Vec<FailedRecord>, QueueStoreError> {
        let sql = format!(
            "SELECT id, queue_name, event_name, payload::text AS payload, error, failed_at \
             FROM {} WHERE queue_name = $1 ORDER BY failed_at ASC, id ASC",
            self.tables.failed()
        );

        let rows = sqlx::query(&sql)
            .bind(queue_name)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_failed", e))?;

        rows.iter()
            .map(|row| {
                FailedRecordRow::from_row(row)
                    .map(FailedRecord::from)
                    .map_err(|e| map_sqlx_error("find_failed", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(failed_id = %id), err)]
    async fn get_failed(
        &self,
        id: FailedRecordId,
    ) -> Result<Option<FailedRecord>, QueueStoreError> {
        let sql = format!(
            "SELECT id, queue_name, event_name, payload::text AS payload, error, failed_at \
             FROM {} WHERE id = $1",
            self.tables.failed()
        );

        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_failed", e))?;

        row.map(|row| {
            FailedRecordRow::from_row(&row)
                .map(FailedRecord::from)
                .map_err(|e| map_sqlx_error("get_failed", e))
        })
        .transpose()
    }

    #[instrument(skip(self), fields(failed_id = %id), err)]
    async fn delete_failed(&self, id: FailedRecordId) -> Result<(), QueueStoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.failed());
        let result = sqlx::query(&sql)
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self, queue_name: &str) -> Result<QueueStats, QueueStoreError> {
        let sql = format!(
            "SELECT \
                (SELECT COUNT(*) FROM {} WHERE queue_name = $1) AS pending, \
                (SELECT COUNT(*) FROM {} WHERE queue_name = $1) AS failed",
            self.tables.queue(),
            self.tables.failed()
        );

        let row = sqlx::query(&sql)
            .bind(queue_name)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let pending: i64 = row.try_get("pending").map_err(|e| map_sqlx_error("stats", e))?;
        let failed: i64 = row.try_get("failed").map_err(|e| map_sqlx_error("stats", e))?;

        Ok(QueueStats {
            pending: usize::try_from(pending).unwrap_or_default(),
            failed: usize::try_from(failed).unwrap_or_default(),
        })
    }
}

fn to_db_int(column: &str, value: u32) -> Result<i32, QueueStoreError> {
    i32::try_from(value)
        .map_err(|_| QueueStoreError::storage(format!("{column} out of range: {value}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::RowNotFound => {
            QueueStoreError::NotFound(format!("no row matched in {operation}"))
        }
        sqlx::Error::Database(db_err) => QueueStoreError::storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            QueueStoreError::storage(format!("connection pool closed in {operation}"))
        }
        other => QueueStoreError::storage(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct QueueRecordRow {
    id: uuid::Uuid,
    queue_name: String,
    event_name: String,
    payload: String,
    attempt: i32,
    retries: i32,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for QueueRecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(QueueRecordRow {
            id: row.try_get("id")?,
            queue_name: row.try_get("queue_name")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            attempt: row.try_get("attempt")?,
            retries: row.try_get("retries")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<QueueRecordRow> for QueueRecord {
    type Error = QueueStoreError;

    fn try_from(row: QueueRecordRow) -> Result<Self, Self::Error> {
        let counter = |column: &str, value: i32| {
            u32::try_from(value).map_err(|_| {
                QueueStoreError::storage(format!("negative {column} for record {}", row.id))
            })
        };

        Ok(QueueRecord {
            id: QueueRecordId::from_uuid(row.id),
            attempt: counter("attempt", row.attempt)?,
            retries: counter("retries", row.retries)?,
            queue_name: row.queue_name,
            event_name: row.event_name,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct FailedRecordRow {
    id: uuid::Uuid,
    queue_name: String,
    event_name: String,
    payload: String,
    error: Json<FailureDetails>,
    failed_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for FailedRecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FailedRecordRow {
            id: row.try_get("id")?,
            queue_name: row.try_get("queue_name")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            failed_at: row.try_get("failed_at")?,
        })
    }
}

impl From<FailedRecordRow> for FailedRecord {
    fn from(row: FailedRecordRow) -> Self {
        FailedRecord {
            id: FailedRecordId::from_uuid(row.id),
            queue_name: row.queue_name,
            event_name: row.event_name,
            payload: row.payload,
            error: row.error.0,
            failed_at: row.failed_at,
        }
    }
}
