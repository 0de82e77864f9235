//! SQLite cache store.
//!
//! Two tables, both looked up by `hash_key` and confirmed by decoding and
//! comparing the stored signature:
//!
//! - `finished_queries (hash_key, signature, response, timestamp)`
//! - `pending_batch_queries (hash_key, signature, batch_job_id, correlation_id, timestamp)`
//!
//! `promote` and `store_pending_many` run in a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};

use crate::error::{QueryError, Result};
use crate::signature::{CacheKey, QuerySignature};
use crate::traits::store::QueryCache;
use crate::types::batch::BatchRequest;
use crate::types::entry::{CacheStats, FinishedQuery, PendingQuery};

/// SQLite-backed query cache.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and migrate) the database at `database_url`.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (use [`in_memory`](Self::in_memory))
    /// - `sqlite://cache/llm_query_cache.sqlite?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// In-memory database on a single connection, so every query sees
    /// the same data.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS finished_queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash_key TEXT NOT NULL,
                signature TEXT NOT NULL,
                response TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_finished_queries_hash_key ON finished_queries(hash_key);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_batch_queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash_key TEXT NOT NULL,
                signature TEXT NOT NULL,
                batch_job_id TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_batch_queries_hash_key ON pending_batch_queries(hash_key);
            CREATE INDEX IF NOT EXISTS idx_pending_batch_queries_job ON pending_batch_queries(batch_job_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn storage(e: impl std::fmt::Display) -> QueryError {
    QueryError::Storage(e.to_string().into())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| storage(format!("Invalid date: {}", e)))?
        .with_timezone(&Utc))
}

fn decode_signature(raw: &str) -> Result<QuerySignature> {
    QuerySignature::from_json(raw).map_err(|e| storage(format!("Invalid signature JSON: {}", e)))
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct FinishedRow {
    id: i64,
    hash_key: String,
    signature: String,
    response: String,
    timestamp: String,
}

impl FinishedRow {
    fn into_finished(self) -> Result<FinishedQuery> {
        Ok(FinishedQuery {
            id: self.id,
            hash_key: CacheKey::from_raw(self.hash_key),
            signature: decode_signature(&self.signature)?,
            response: self.response,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct PendingRow {
    id: i64,
    hash_key: String,
    signature: String,
    batch_job_id: String,
    correlation_id: String,
    timestamp: String,
}

impl PendingRow {
    fn into_pending(self) -> Result<PendingQuery> {
        Ok(PendingQuery {
            id: self.id,
            hash_key: CacheKey::from_raw(self.hash_key),
            signature: decode_signature(&self.signature)?,
            batch_job_id: self.batch_job_id,
            correlation_id: self.correlation_id,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

const FINISHED_COLUMNS: &str = "id, hash_key, signature, response, timestamp";
const PENDING_COLUMNS: &str = "id, hash_key, signature, batch_job_id, correlation_id, timestamp";

async fn insert_pending(
    tx: &mut Transaction<'_, Sqlite>,
    signature: &QuerySignature,
    job_id: &str,
    correlation_id: &str,
) -> Result<PendingQuery> {
    let hash_key = signature.cache_key();
    let timestamp = Utc::now();

    let done = sqlx::query(
        r#"
        INSERT INTO pending_batch_queries (hash_key, signature, batch_job_id, correlation_id, timestamp)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(hash_key.as_str())
    .bind(signature.to_json())
    .bind(job_id)
    .bind(correlation_id)
    .bind(timestamp.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    Ok(PendingQuery {
        id: done.last_insert_rowid(),
        hash_key,
        signature: signature.clone(),
        batch_job_id: job_id.to_string(),
        correlation_id: correlation_id.to_string(),
        timestamp,
    })
}

#[async_trait]
impl QueryCache for SqliteStore {
    async fn lookup_finished(&self, signature: &QuerySignature) -> Result<Option<FinishedQuery>> {
        let rows = sqlx::query_as::<_, FinishedRow>(&format!(
            "SELECT {} FROM finished_queries WHERE hash_key = ? ORDER BY id",
            FINISHED_COLUMNS
        ))
        .bind(signature.cache_key().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        for row in rows {
            let entry = row.into_finished()?;
            if &entry.signature == signature {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn store_finished(
        &self,
        signature: &QuerySignature,
        response: &str,
    ) -> Result<FinishedQuery> {
        let hash_key = signature.cache_key();
        let timestamp = Utc::now();

        let done = sqlx::query(
            "INSERT INTO finished_queries (hash_key, signature, response, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(hash_key.as_str())
        .bind(signature.to_json())
        .bind(response)
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(FinishedQuery {
            id: done.last_insert_rowid(),
            hash_key,
            signature: signature.clone(),
            response: response.to_string(),
            timestamp,
        })
    }

    async fn update_finished(&self, entry: &FinishedQuery, response: &str) -> Result<FinishedQuery> {
        let timestamp = Utc::now();

        let done = sqlx::query("UPDATE finished_queries SET response = ?, timestamp = ? WHERE id = ?")
            .bind(response)
            .bind(timestamp.to_rfc3339())
            .bind(entry.id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if done.rows_affected() == 0 {
            return Err(storage(format!("finished entry {} not found", entry.id)));
        }

        Ok(FinishedQuery {
            response: response.to_string(),
            timestamp,
            ..entry.clone()
        })
    }

    async fn lookup_pending(&self, signature: &QuerySignature) -> Result<Option<PendingQuery>> {
        let rows = sqlx::query_as::<_, PendingRow>(&format!(
            "SELECT {} FROM pending_batch_queries WHERE hash_key = ? ORDER BY id",
            PENDING_COLUMNS
        ))
        .bind(signature.cache_key().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        for row in rows {
            let entry = row.into_pending()?;
            if &entry.signature == signature {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn lookup_pending_by_job(&self, job_id: &str) -> Result<Vec<PendingQuery>> {
        let rows = sqlx::query_as::<_, PendingRow>(&format!(
            "SELECT {} FROM pending_batch_queries WHERE batch_job_id = ? ORDER BY id",
            PENDING_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(PendingRow::into_pending).collect()
    }

    async fn store_pending(
        &self,
        signature: &QuerySignature,
        job_id: &str,
        correlation_id: &str,
    ) -> Result<PendingQuery> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let entry = insert_pending(&mut tx, signature, job_id, correlation_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(entry)
    }

    async fn store_pending_many(&self, job_id: &str, requests: &[BatchRequest]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for request in requests {
            insert_pending(&mut tx, &request.signature, job_id, &request.correlation_id).await?;
        }
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn promote(
        &self,
        pending: &PendingQuery,
        response: &str,
    ) -> Result<Option<FinishedQuery>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let timestamp = Utc::now();

        let deleted = sqlx::query("DELETE FROM pending_batch_queries WHERE id = ?")
            .bind(pending.id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, FinishedRow>(&format!(
            "SELECT {} FROM finished_queries WHERE hash_key = ? ORDER BY id",
            FINISHED_COLUMNS
        ))
        .bind(pending.hash_key.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        let mut existing = None;
        for row in rows {
            let entry = row.into_finished()?;
            if entry.signature == pending.signature {
                existing = Some(entry);
                break;
            }
        }

        let promoted = match existing {
            Some(entry) => {
                sqlx::query("UPDATE finished_queries SET response = ?, timestamp = ? WHERE id = ?")
                    .bind(response)
                    .bind(timestamp.to_rfc3339())
                    .bind(entry.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                FinishedQuery {
                    response: response.to_string(),
                    timestamp,
                    ..entry
                }
            }
            None => {
                let done = sqlx::query(
                    "INSERT INTO finished_queries (hash_key, signature, response, timestamp) VALUES (?, ?, ?, ?)",
                )
                .bind(pending.hash_key.as_str())
                .bind(pending.signature.to_json())
                .bind(response)
                .bind(timestamp.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
                FinishedQuery {
                    id: done.last_insert_rowid(),
                    hash_key: pending.hash_key.clone(),
                    signature: pending.signature.clone(),
                    response: response.to_string(),
                    timestamp,
                }
            }
        };

        tx.commit().await.map_err(storage)?;
        Ok(Some(promoted))
    }

    async fn delete_pending_by_job(&self, job_id: &str) -> Result<usize> {
        let done = sqlx::query("DELETE FROM pending_batch_queries WHERE batch_job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(done.rows_affected() as usize)
    }

    async fn pending_job_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT batch_job_id FROM pending_batch_queries ORDER BY batch_job_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (finished,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM finished_queries")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let (pending,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_batch_queries")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        Ok(CacheStats {
            finished: finished as usize,
            pending: pending as usize,
            pending_jobs: self.pending_job_ids().await?,
        })
    }
}
