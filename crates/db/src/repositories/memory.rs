use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use strata_core::memory::{BackendError, MemoryBackend, MemoryRecord};
use tracing::debug;

use super::RepositoryError;
use crate::DbPool;

/// Durable memory backend over the `memory_record` table. Each put is one
/// upsert, so a restarted process reloads exactly the last committed writes.
#[derive(Clone)]
pub struct SqlMemoryBackend {
    pool: DbPool,
}

impl SqlMemoryBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self) -> Result<Vec<MemoryRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT key, value, category, access_count, created_at, updated_at
             FROM memory_record
             ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn save(&self, record: &MemoryRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        save_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// All records in one transaction, so a failed row leaves none written.
    async fn save_all(&self, records: &[MemoryRecord]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            save_in(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM memory_record WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, keys: &[String]) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            let result =
                sqlx::query("DELETE FROM memory_record WHERE key = ?").bind(key).execute(&mut *tx).await?;
            if result.rows_affected() > 0 {
                removed += 1;
            }
        }
        tx.commit().await?;
        Ok(removed)
    }
}

async fn save_in(tx: &mut Transaction<'_, Sqlite>, record: &MemoryRecord) -> Result<(), RepositoryError> {
    let access_count = i64::try_from(record.access_count).map_err(|_| {
        RepositoryError::Decode(format!("access_count out of range for `{}`", record.key))
    })?;
    sqlx::query(
        "INSERT INTO memory_record (key, value, category, access_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            category = excluded.category,
            access_count = excluded.access_count,
            updated_at = excluded.updated_at",
    )
    .bind(&record.key)
    .bind(&record.value)
    .bind(&record.category)
    .bind(access_count)
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl MemoryBackend for SqlMemoryBackend {
    async fn load_all(&self) -> Result<Vec<MemoryRecord>, BackendError> {
        let records = self.fetch_all().await?;
        debug!(event_name = "memory.backend.loaded", records = records.len(), "memory records loaded");
        Ok(records)
    }

    async fn upsert(&self, record: &MemoryRecord) -> Result<(), BackendError> {
        Ok(self.save(record).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.delete(key).await?)
    }

    async fn upsert_many(&self, records: &[MemoryRecord]) -> Result<(), BackendError> {
        Ok(self.save_all(records).await?)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<usize, BackendError> {
        Ok(self.delete_all(keys).await?)
    }
}

fn record_from_row(row: SqliteRow) -> Result<MemoryRecord, RepositoryError> {
    let key: String = row.try_get("key")?;
    let access_count: i64 = row.try_get("access_count")?;
    let access_count = u64::try_from(access_count).map_err(|_| {
        RepositoryError::Decode(format!("negative access_count `{access_count}` for `{key}`"))
    })?;
    Ok(MemoryRecord {
        value: row.try_get("value")?,
        category: row.try_get("category")?,
        access_count,
        key,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
