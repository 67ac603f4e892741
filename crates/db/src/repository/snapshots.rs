//! State snapshot repository functions.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::models::{split_key, SnapshotRow};
use crate::{DbError, DbPool};

/// Upsert every `(key, state)` pair inside one transaction.
///
/// Returns the number of rows written. Either all entries land or none do.
pub async fn save_snapshots(pool: &DbPool, entries: &[(String, Value)]) -> Result<u64, DbError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for (key, state) in entries {
        let (run_id, node_id) = split_key(key);
        let result = sqlx::query(
            r#"
            INSERT INTO state_snapshots (key, run_id, node_id, state, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(run_id)
        .bind(node_id)
        .bind(state.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }

    tx.commit().await?;
    debug!(entries = entries.len(), "snapshots saved");
    Ok(written)
}

/// Fetch one snapshot by key.
pub async fn load_snapshot(pool: &DbPool, key: &str) -> Result<SnapshotRow, DbError> {
    sqlx::query_as::<_, SnapshotRow>(
        "SELECT key, run_id, node_id, state, updated_at FROM state_snapshots WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// All snapshots of one run, ordered by node id.
pub async fn list_run_snapshots(pool: &DbPool, run_id: &str) -> Result<Vec<SnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT key, run_id, node_id, state, updated_at
        FROM state_snapshots
        WHERE run_id = ?
        ORDER BY node_id
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove a run's snapshots; returns how many were deleted.
pub async fn delete_run_snapshots(pool: &DbPool, run_id: &str) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM state_snapshots WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn memory_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let pool = memory_pool().await;
        save_snapshots(&pool, &[("run-1:fetch".into(), json!({ "rows": [1, 2] }))])
            .await
            .unwrap();

        let row = load_snapshot(&pool, "run-1:fetch").await.unwrap();
        assert_eq!(row.run_id, "run-1");
        assert_eq!(row.node_id, "fetch");
        assert_eq!(row.state_json().unwrap(), json!({ "rows": [1, 2] }));
    }

    #[tokio::test]
    async fn saving_the_same_key_overwrites() {
        let pool = memory_pool().await;
        save_snapshots(&pool, &[("r:a".into(), json!(1))]).await.unwrap();
        save_snapshots(&pool, &[("r:a".into(), json!(2))]).await.unwrap();

        let rows = list_run_snapshots(&pool, "r").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state_json().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn runs_are_listed_and_deleted_independently() {
        let pool = memory_pool().await;
        save_snapshots(
            &pool,
            &[
                ("r1:b".into(), json!({})),
                ("r1:a".into(), json!({})),
                ("r2:a".into(), json!({})),
            ],
        )
        .await
        .unwrap();

        let r1: Vec<String> = list_run_snapshots(&pool, "r1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(r1, vec!["a", "b"]);

        assert_eq!(delete_run_snapshots(&pool, "r1").await.unwrap(), 2);
        assert_eq!(list_run_snapshots(&pool, "r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let pool = memory_pool().await;
        assert!(matches!(
            load_snapshot(&pool, "nope").await,
            Err(DbError::NotFound)
        ));
    }
}
