//! SQLite connection pool and schema bootstrap.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared pool used across the whole application.
pub type DbPool = SqlitePool;

/// Create a new connection pool from the given `database_url`, creating the
/// database file when it does not exist.
///
/// `max_connections` controls the pool ceiling. An in-memory database
/// (`sqlite::memory:`) is private to each connection, so use `1` there.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!("Connecting to database (max_connections={})", max_connections);
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create the tables this crate reads and writes. Idempotent.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("Running database migrations");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS state_snapshots (
            key        TEXT PRIMARY KEY,
            run_id     TEXT NOT NULL,
            node_id    TEXT NOT NULL,
            state      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_state_snapshots_run ON state_snapshots(run_id)")
        .execute(pool)
        .await?;
    Ok(())
}
