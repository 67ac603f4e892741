//! [`StateStore`] backed by the SQLite snapshot table.

use async_trait::async_trait;
use serde_json::Value;

use db::repository::snapshots;
use db::DbPool;

use crate::context::StateStore;
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct SqlStateStore {
    pool: DbPool,
}

impl SqlStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect, create the schema, and wrap the pool.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = db::create_pool(database_url, 5).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn bulk_save(&self, entries: Vec<(String, Value)>) -> Result<(), EngineError> {
        snapshots::save_snapshots(&self.pool, &entries).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowExecutionContext;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn flush_writes_snapshot_rows() {
        let pool = db::create_pool("sqlite::memory:", 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = SqlStateStore::new(pool.clone());
        let mut ctx = WorkflowExecutionContext::default().with_store(Arc::new(store));

        ctx.persist_state("run-9:a", json!({ "ok": true })).await.unwrap();
        ctx.persist_state("run-9:b", json!({ "ok": false })).await.unwrap();
        ctx.finish().await;

        let rows = snapshots::list_run_snapshots(&pool, "run-9").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state_json().unwrap(), json!({ "ok": true }));
    }
}
