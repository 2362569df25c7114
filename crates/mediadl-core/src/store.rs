//! Download store - the keyed collection of download records
//!
//! The store is the single source of truth for what is pending. Iteration
//! order is insertion order; re-inserting an existing key keeps its place.

use crate::error::MediaDlError;
use crate::migration::{migrate_value, CURRENT_SCHEMA_VERSION};
use crate::record::DownloadRecord;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// All records in insertion order
    async fn get_all(&self) -> Result<Vec<DownloadRecord>, MediaDlError>;

    async fn get(&self, key: &str) -> Result<Option<DownloadRecord>, MediaDlError>;

    /// Insert or overwrite the record stored under `record.key()`
    async fn upsert(&self, record: &DownloadRecord) -> Result<(), MediaDlError>;

    /// Returns whether a record was removed
    async fn delete(&self, key: &str) -> Result<bool, MediaDlError>;

    /// Number of records per status, ordered by status name
    async fn count_by_status(&self) -> Result<Vec<(String, i64)>, MediaDlError> {
        let mut counts = BTreeMap::new();
        for record in self.get_all().await? {
            *counts.entry(record.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    order: Vec<String>,
    records: HashMap<String, DownloadRecord>,
}

/// Store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<DownloadRecord>, MediaDlError> {
        let state = self.state.read();
        Ok(state
            .order
            .iter()
            .filter_map(|key| state.records.get(key).cloned())
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<DownloadRecord>, MediaDlError> {
        Ok(self.state.read().records.get(key).cloned())
    }

    async fn upsert(&self, record: &DownloadRecord) -> Result<(), MediaDlError> {
        let key = record.key();
        let mut state = self.state.write();
        if state.records.insert(key.clone(), record.clone()).is_none() {
            state.order.push(key);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, MediaDlError> {
        let mut state = self.state.write();
        let removed = state.records.remove(key).is_some();
        if removed {
            state.order.retain(|k| k != key);
        }
        Ok(removed)
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Store persisted in a SQLite database.
///
/// Each row holds the full record as JSON plus a few columns for lookups.
/// Rows are read back through the record migration step.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, MediaDlError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Database that lives only as long as the store
    pub async fn in_memory() -> Result<Self, MediaDlError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, MediaDlError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                key TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                server_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                status TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);
            CREATE INDEX IF NOT EXISTS idx_downloads_seq ON downloads(seq);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DownloadRecord, MediaDlError> {
    let json: String = row.get("record");
    migrate_value(serde_json::from_str(&json)?)
}

#[async_trait]
impl DownloadStore for SqliteStore {
    async fn get_all(&self) -> Result<Vec<DownloadRecord>, MediaDlError> {
        let rows = sqlx::query("SELECT key, record FROM downloads ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            match row_to_record(row) {
                Ok(record) => records.push(record),
                // One unreadable row must not hide every other download
                Err(e) => warn!("Skipping unreadable download {}: {}", key, e),
            }
        }
        Ok(records)
    }

    async fn get(&self, key: &str) -> Result<Option<DownloadRecord>, MediaDlError> {
        let row = sqlx::query("SELECT record FROM downloads WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_record).transpose()
    }

    async fn upsert(&self, record: &DownloadRecord) -> Result<(), MediaDlError> {
        let item = record.item();

        sqlx::query(
            r#"
            INSERT INTO downloads (
                key, seq, server_id, item_id, status, schema_version, record, updated_at
            ) VALUES (
                ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM downloads), ?, ?, ?, ?, ?, ?
            )
            ON CONFLICT(key) DO UPDATE SET
                server_id = excluded.server_id,
                item_id = excluded.item_id,
                status = excluded.status,
                schema_version = excluded.schema_version,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.key())
        .bind(&item.server_id)
        .bind(&item.id)
        .bind(record.status.as_str())
        .bind(CURRENT_SCHEMA_VERSION as i64)
        .bind(serde_json::to_string(record)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, MediaDlError> {
        let result = sqlx::query("DELETE FROM downloads WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>, MediaDlError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM downloads GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("total")))
            .collect())
    }
}
