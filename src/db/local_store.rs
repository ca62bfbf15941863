//! Per-user local cache of synchronized records and image blobs.
//!
//! Record writes replace a user's whole set inside one transaction, so readers
//! see either the previous set or the new one.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;

use super::init_database;
use crate::errors::CacheError;
use crate::models::{CachedImage, RecordKind, SyncRecord};

/// Handle to the local persistent store.
///
/// Cloning is cheap; all clones share one engine, opened lazily on first use
/// and reused for the rest of the process.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl LocalStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db_path: db_path.into(),
                pool: OnceCell::new(),
            }),
        }
    }

    /// Whether the engine has been opened yet.
    pub fn is_open(&self) -> bool {
        self.inner.pool.initialized()
    }

    async fn pool(&self) -> Result<&SqlitePool, CacheError> {
        self.inner
            .pool
            .get_or_try_init(|| async {
                tracing::info!("Opening local cache at {:?}", self.inner.db_path);
                init_database(&self.inner.db_path)
                    .await
                    .map_err(CacheError::from)
            })
            .await
    }

    // ==================== RECORD OPERATIONS ====================

    /// Replace every cached record of `T`'s kind for `user_id` with `records`.
    pub async fn cache_records<T: SyncRecord>(
        &self,
        user_id: &str,
        records: &[T],
    ) -> Result<(), CacheError> {
        let table = T::KIND.table();

        // Encode up front so a bad record never opens a transaction.
        let payloads = records
            .iter()
            .map(|record| Ok((record.id().to_string(), serde_json::to_string(record)?)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {} WHERE user_id = ?", table))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let insert = format!(
            "INSERT OR REPLACE INTO {} (id, user_id, payload) VALUES (?, ?, ?)",
            table
        );
        for (id, payload) in &payloads {
            sqlx::query(&insert)
                .bind(id)
                .bind(user_id)
                .bind(payload)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Cached {} {} for user {}",
            payloads.len(),
            T::KIND,
            user_id
        );
        Ok(())
    }

    /// All cached records of `T`'s kind for `user_id`, ordered by id.
    ///
    /// Only the record payload is decoded; the owning user id stays in its
    /// column, and any scoping field inside an older payload is ignored.
    /// Rows that no longer decode are skipped.
    pub async fn get_cached_records<T: SyncRecord>(
        &self,
        user_id: &str,
    ) -> Result<Vec<T>, CacheError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT id, payload FROM {} WHERE user_id = ? ORDER BY id",
            T::KIND.table()
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id: String = row.get("id");
                    tracing::warn!("Skipping undecodable cached {} {}: {}", T::KIND, id, e);
                }
            }
        }
        Ok(records)
    }

    /// Drop cached records belonging to any user other than `user_id`.
    pub async fn retain_user(&self, user_id: &str) -> Result<u64, CacheError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut removed = 0;
        for kind in [RecordKind::Outfits, RecordKind::Collections] {
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE user_id <> ?",
                kind.table()
            ))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;

        if removed > 0 {
            tracing::info!("Removed {} cached records of previous users", removed);
        }
        Ok(removed)
    }

    // ==================== IMAGE OPERATIONS ====================

    /// Insert or overwrite the cached bytes for `url`.
    pub async fn cache_image(&self, url: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"INSERT INTO images (url, bytes, cached_at) VALUES (?, ?, ?)
               ON CONFLICT(url) DO UPDATE SET bytes = excluded.bytes, cached_at = excluded.cached_at"#,
        )
        .bind(url)
        .bind(bytes)
        .bind(timestamp(&Utc::now()))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_cached_image(&self, url: &str) -> Result<Option<CachedImage>, CacheError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT url, bytes, cached_at FROM images WHERE url = ?")
            .bind(url)
            .fetch_optional(pool)
            .await?;

        row.as_ref().map(image_from_row).transpose()
    }

    /// Remove the cached bytes for each of `urls`.
    pub async fn remove_images(&self, urls: &[&str]) -> Result<u64, CacheError> {
        if urls.is_empty() {
            return Ok(0);
        }
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut removed = 0;
        for url in urls {
            let result = sqlx::query("DELETE FROM images WHERE url = ?")
                .bind(*url)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Evict image blobs cached before `cutoff`.
    pub async fn evict_images_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM images WHERE cached_at < ?")
            .bind(timestamp(&cutoff))
            .execute(pool)
            .await?;

        tracing::debug!("Evicted {} cached images", result.rows_affected());
        Ok(result.rows_affected())
    }

    // ==================== MAINTENANCE ====================

    /// Wipe every record table and the image cache.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        for table in [
            RecordKind::Outfits.table(),
            RecordKind::Collections.table(),
            "images",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!("Local cache cleared");
        Ok(())
    }
}

// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn image_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CachedImage, CacheError> {
    let cached_at: String = row.get("cached_at");
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
        .map_err(|e| CacheError::Corrupt(format!("bad cached_at {:?}: {}", cached_at, e)))?
        .with_timezone(&Utc);

    Ok(CachedImage {
        url: row.get("url"),
        bytes: row.get("bytes"),
        cached_at,
    })
}
