use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::DatabaseConfig;
use crate::models::SentRecord;
use crate::Result;

const CREATE_SENT_ADS: &str = r#"
    CREATE TABLE IF NOT EXISTS sent_ads (
        id TEXT NOT NULL,
        filter_name TEXT NOT NULL,
        title TEXT,
        sent_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (id, filter_name)
    )
"#;

/// Persistent set of (listing id, filter name) pairs that were already handled.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Pure lookup.
    async fn is_sent(&self, listing_id: &str, filter_name: &str) -> Result<bool>;

    /// Idempotent upsert; a second call for the same pair overwrites title and timestamp.
    async fn mark_sent(&self, listing_id: &str, filter_name: &str, title: &str) -> Result<()>;

    /// Release the storage handle.
    async fn close(&self);
}

pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.path == ":memory:" {
            return Self::in_memory().await;
        }

        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database; one connection so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_SENT_ADS).execute(&pool).await?;
        tracing::debug!("sent_ads table ready");
        Ok(Self { pool })
    }

    pub async fn get(&self, listing_id: &str, filter_name: &str) -> Result<Option<SentRecord>> {
        let record = sqlx::query_as::<_, SentRecord>(
            "SELECT id, filter_name, title, sent_at FROM sent_ads WHERE id = ? AND filter_name = ?",
        )
        .bind(listing_id)
        .bind(filter_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_ads")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Wipe every record. Maintenance only; returns the number of rows removed.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sent_ads").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn is_sent(&self, listing_id: &str, filter_name: &str) -> Result<bool> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM sent_ads WHERE id = ? AND filter_name = ?")
                .bind(listing_id)
                .bind(filter_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn mark_sent(&self, listing_id: &str, filter_name: &str, title: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sent_ads (id, filter_name, title, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(listing_id)
        .bind(filter_name)
        .bind(title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::info!("Dedup store closed");
        }
    }
}
