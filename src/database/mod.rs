pub mod chapters;
pub mod children;
pub mod schema;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{fs, path::Path, str::FromStr, time::Duration};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Ensures the parent directory of the database file exists
pub fn ensure_directory_structure(database_path: &str) -> Result<()> {
    // Handle SQLite URL format (remove "sqlite:" prefix and query string if present)
    let clean_path = database_path
        .strip_prefix("sqlite:")
        .unwrap_or(database_path);
    let clean_path = clean_path.split('?').next().unwrap_or(clean_path);
    let db_path = Path::new(clean_path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
            info!("Created directory: {}", parent.display());
        }
    }

    Ok(())
}

pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    info!("Connecting to SQLite database");

    ensure_directory_structure(database_url)?;

    let connect_opts = SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;

    schema::run_migrations(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every connection to `sqlite::memory:`
/// opens a fresh database, so the pool must never recycle its connection.
pub async fn create_memory_pool() -> Result<DbPool> {
    let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_opts)
        .await?;

    schema::run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn close_pool(pool: DbPool) {
    info!("Closing database connection pool");
    pool.close().await;
}

/// Timestamps are stored as microseconds since the Unix epoch so that
/// ordering and year-range queries are plain integer comparisons.
pub(crate) fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}
