//! ABOUTME: SQLite implementation of the connection driver seam
//! ABOUTME: One sqlx pool per connection lifetime; WAL mode, tuned pragmas

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::time::Duration;
use tracing::{debug, info};

use tt_conn::{Driver, PoolSettings};
use tt_core::{Error, Result};

/// Driver that opens a sqlx SQLite pool.
///
/// The pool itself supports concurrent use, so the manager can hand it
/// to any number of query closures at once. A fresh pool is created for
/// every connection lifetime; `disconnect` closes it for good.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    path: String,
}

impl SqliteDriver {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    type Client = SqlitePool;

    async fn connect(&self, settings: &PoolSettings) -> Result<SqlitePool> {
        info!(path = %self.path, "Opening SQLite connection pool");

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("foreign_keys", "ON")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "30000");

        let pool = SqlitePoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(Duration::from_millis(settings.acquire_timeout_ms))
            .idle_timeout(Some(Duration::from_millis(settings.idle_timeout_ms)))
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(format!("Failed to open connection pool: {}", e)))?;

        Ok(pool)
    }

    async fn probe(&self, client: &SqlitePool) -> Result<()> {
        debug!("Probing SQLite connection");
        sqlx::query("SELECT 1")
            .fetch_one(client)
            .await
            .map_err(|e| Error::Connection(format!("Probe failed: {}", e)))?;
        Ok(())
    }

    async fn disconnect(&self, client: &SqlitePool) -> Result<()> {
        client.close().await;
        Ok(())
    }
}
