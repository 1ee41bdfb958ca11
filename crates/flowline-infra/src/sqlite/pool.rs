//! Connection pools for the shared instance store.
//!
//! Claims, post-execution commits and recovery are all writes, and SQLite
//! admits one writer at a time. Each process therefore funnels its writes
//! through a single writer connection; contention with other nodes on the
//! same file is resolved by SQLite's write lock within `busy_timeout`.
//! Candidate selection, instance loads and statistics use the read-only
//! pool, which WAL mode lets run beside the writer.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

/// Sizing and lock-wait settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Read-only connections.
    pub readers: u32,
    /// How long a write waits for another node's write lock.
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            readers: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Reader pool plus a single-connection writer pool over one database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect(database_url, &PoolSettings::default()).await
    }

    /// Open the store and bring its schema up to date. Migrations run on the
    /// writer before any reader connects.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(settings.busy_timeout)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(settings.readers.max(1))
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(readers = settings.readers, "opened instance store");
        Ok(Self { reader, writer })
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

/// `sqlite://$FLOWLINE_DATA_DIR/flowline.db`, with the data directory
/// defaulting to `~/.flowline`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("FLOWLINE_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.flowline")
    });
    format!("sqlite://{data_dir}/flowline.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display())
    }

    #[tokio::test]
    async fn test_migrations_create_store_schema_and_claim_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&url(&dir)).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table'
             AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "executors",
                "workflow_actions",
                "workflow_definitions",
                "workflow_instances",
                "workflow_state_variables",
            ]
        );

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'workflow_instances'",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();
        assert!(indexes.iter().any(|i| i == "idx_workflow_instances_pollable"));
        assert!(indexes.iter().any(|i| i == "idx_workflow_instances_executor"));
    }

    #[tokio::test]
    async fn test_writes_go_through_one_wal_connection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PoolSettings {
            readers: 2,
            busy_timeout: Duration::from_millis(250),
        };
        let pool = DatabasePool::connect(&url(&dir), &settings).await.unwrap();

        assert_eq!(pool.writer.options().get_max_connections(), 1);
        assert_eq!(pool.reader.options().get_max_connections(), 2);

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let write_on_reader = sqlx::query("DELETE FROM executors").execute(&pool.reader).await;
        assert!(write_on_reader.is_err());
    }

    #[tokio::test]
    async fn test_reopening_an_existing_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = DatabasePool::new(&url(&dir)).await.unwrap();
        first.close().await;
        assert!(DatabasePool::new(&url(&dir)).await.is_ok());
    }

    #[test]
    fn test_default_database_url() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("/flowline.db"));
    }
}
