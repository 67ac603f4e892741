//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::DbError;

// ---------------------------------------------------------------------------
// state_snapshots
// ---------------------------------------------------------------------------

/// One persisted state snapshot, keyed `<run_id>:<node_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnapshotRow {
    pub key: String,
    pub run_id: String,
    pub node_id: String,
    /// JSON text.
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

impl SnapshotRow {
    pub fn state_json(&self) -> Result<Value, DbError> {
        serde_json::from_str(&self.state).map_err(|source| DbError::CorruptSnapshot {
            key: self.key.clone(),
            source,
        })
    }
}

/// Split a snapshot key into `(run_id, node_id)`.
///
/// Keys without a separator belong to no particular node.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}
