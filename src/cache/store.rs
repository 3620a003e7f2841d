use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::cache::entry::{CacheEntry, EntryMeta};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open image store: {0}")]
    Open(#[source] sqlx::Error),

    #[error("Image store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Stored timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreUsage {
    pub count: u64,
    pub total_size: u64,
    pub oldest_stored_at: Option<DateTime<Utc>>,
}

type EntryRow = (String, Vec<u8>, i64, i64);
type MetaRow = (String, i64, i64);

/// Durable URL -> image table backed by SQLite.
///
/// The pool is opened lazily on first use and memoized; concurrent first
/// callers wait on the same initialization. Every write runs in its own
/// transaction so a failure only ever rolls back that one operation.
#[derive(Debug)]
pub struct ImageStore {
    database_url: String,
    pool: OnceCell<SqlitePool>,
}

impl ImageStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: OnceCell::new(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        self.pool().await.map(|_| ())
    }

    async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<SqlitePool, StoreError> {
        let in_memory = self.database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&self.database_url)
            .map_err(StoreError::Open)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(StoreError::Open)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                url TEXT PRIMARY KEY NOT NULL,
                payload BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                size INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StoreError::Open)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_stored_at ON images (stored_at)")
            .execute(&pool)
            .await
            .map_err(StoreError::Open)?;

        info!("Image store opened at {}", self.database_url);
        Ok(pool)
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT url, payload, stored_at, size FROM images WHERE url = ?",
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    pub async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO images (url, payload, stored_at, size)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at,
                size = excluded.size
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.payload[..])
        .bind(entry.stored_at.timestamp_millis())
        .bind(entry.size as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM images WHERE url = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            removed += sqlx::query("DELETE FROM images WHERE url = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!("Deleted {} of {} requested image entries", removed, keys.len());
        Ok(removed)
    }

    /// Delete each `(key, stored_at)` pair only if the row still carries that
    /// timestamp. Rows rewritten since they were read are left alone.
    pub async fn delete_unchanged(
        &self,
        versions: &[(String, DateTime<Utc>)],
    ) -> Result<u64, StoreError> {
        if versions.is_empty() {
            return Ok(0);
        }

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut removed = 0;
        for (key, stored_at) in versions {
            removed += sqlx::query("DELETE FROM images WHERE url = ? AND stored_at = ?")
                .bind(key)
                .bind(stored_at.timestamp_millis())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!("Deleted {} of {} stale image entries", removed, versions.len());
        Ok(removed)
    }

    pub async fn get_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT url, payload, stored_at, size FROM images",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    pub async fn get_all_meta(&self) -> Result<Vec<EntryMeta>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, MetaRow>("SELECT url, stored_at, size FROM images")
            .fetch_all(pool)
            .await?;

        rows.into_iter()
            .map(|(key, stored_at, size)| {
                Ok(EntryMeta {
                    key,
                    stored_at: timestamp_from_millis(stored_at)?,
                    size: size.max(0) as u64,
                })
            })
            .collect()
    }

    pub async fn usage(&self) -> Result<StoreUsage, StoreError> {
        let pool = self.pool().await?;
        let (count, total_size, oldest) = sqlx::query_as::<_, (i64, i64, Option<i64>)>(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), MIN(stored_at) FROM images",
        )
        .fetch_one(pool)
        .await?;

        Ok(StoreUsage {
            count: count.max(0) as u64,
            total_size: total_size.max(0) as u64,
            oldest_stored_at: oldest.map(timestamp_from_millis).transpose()?,
        })
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM images").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

fn entry_from_row((key, payload, stored_at, size): EntryRow) -> Result<CacheEntry, StoreError> {
    Ok(CacheEntry {
        key,
        payload: Bytes::from(payload),
        stored_at: timestamp_from_millis(stored_at)?,
        size: size.max(0) as u64,
    })
}

fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(StoreError::InvalidTimestamp(millis))
}
