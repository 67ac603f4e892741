//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    /// A stored state column is not valid JSON.
    #[error("corrupt snapshot '{key}': {source}")]
    CorruptSnapshot {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
