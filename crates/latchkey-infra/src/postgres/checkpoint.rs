//! PostgreSQL checkpoint repository.
//!
//! Appends for one thread are serialized with a transaction-scoped advisory
//! lock so concurrent writers cannot hand out the same `checkpoint_id`. The
//! lock uses the two-key form (`class`, `hashtext(thread_id)`), which lives in
//! a separate key space from the single bigint keys used for workflow locks.

use chrono::{DateTime, Utc};
use latchkey_core::checkpoint::CheckpointRepository;
use latchkey_types::checkpoint::{Checkpoint, NewCheckpoint};
use latchkey_types::error::RepositoryError;
use sqlx::{PgPool, Row};

use crate::error::map_sqlx_error;

const APPEND_LOCK_CLASS: i32 = 19531;

const COLUMNS: &str = "c.thread_id, c.checkpoint_id, c.namespace, c.parent_checkpoint_id, \
                       c.state, c.is_terminal, c.created_at";

/// PostgreSQL-backed implementation of [`CheckpointRepository`].
#[derive(Clone)]
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct CheckpointRow {
    thread_id: String,
    checkpoint_id: i64,
    namespace: String,
    parent_checkpoint_id: Option<i64>,
    state: serde_json::Value,
    is_terminal: bool,
    created_at: DateTime<Utc>,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            checkpoint_id: row.try_get("checkpoint_id")?,
            namespace: row.try_get("namespace")?,
            parent_checkpoint_id: row.try_get("parent_checkpoint_id")?,
            state: row.try_get("state")?,
            is_terminal: row.try_get("is_terminal")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Checkpoint {
        Checkpoint {
            thread_id: self.thread_id,
            checkpoint_id: self.checkpoint_id,
            namespace: self.namespace,
            parent_checkpoint_id: self.parent_checkpoint_id,
            state: self.state,
            is_terminal: self.is_terminal,
            created_at: self.created_at,
        }
    }
}

fn map_rows(rows: &[sqlx::postgres::PgRow]) -> Result<Vec<Checkpoint>, RepositoryError> {
    rows.iter()
        .map(|row| {
            CheckpointRow::from_row(row)
                .map(CheckpointRow::into_checkpoint)
                .map_err(map_sqlx_error)
        })
        .collect()
}

impl CheckpointRepository for PgCheckpointRepository {
    async fn append(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(APPEND_LOCK_CLASS)
            .bind(&checkpoint.thread_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let parent: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(checkpoint_id) FROM latchkey_checkpoints WHERE thread_id = $1",
        )
        .bind(&checkpoint.thread_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let checkpoint_id = parent.map_or(1, |id| id + 1);

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"INSERT INTO latchkey_checkpoints
               (thread_id, checkpoint_id, namespace, parent_checkpoint_id, state, is_terminal)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING created_at"#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint_id)
        .bind(&checkpoint.namespace)
        .bind(parent)
        .bind(&checkpoint.state)
        .bind(checkpoint.is_terminal)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id,
            namespace = %checkpoint.namespace,
            is_terminal = checkpoint.is_terminal,
            "checkpoint appended"
        );

        Ok(Checkpoint {
            thread_id: checkpoint.thread_id.clone(),
            checkpoint_id,
            namespace: checkpoint.namespace.clone(),
            parent_checkpoint_id: parent,
            state: checkpoint.state.clone(),
            is_terminal: checkpoint.is_terminal,
            created_at,
        })
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM latchkey_checkpoints c \
             WHERE c.thread_id = $1 ORDER BY c.checkpoint_id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| {
            CheckpointRow::from_row(&r)
                .map(CheckpointRow::into_checkpoint)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Checkpoint>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM latchkey_checkpoints c \
             WHERE c.thread_id = $1 ORDER BY c.checkpoint_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        map_rows(&rows)
    }

    async fn find_incomplete(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM latchkey_checkpoints c \
             JOIN (SELECT thread_id, MAX(checkpoint_id) AS latest \
                   FROM latchkey_checkpoints GROUP BY thread_id) l \
               ON c.thread_id = l.thread_id AND c.checkpoint_id = l.latest \
             WHERE NOT c.is_terminal \
               AND ($1::timestamptz IS NULL OR c.created_at >= $1) \
             ORDER BY c.created_at DESC, c.thread_id \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(created_after)
            .bind(i64::try_from(max_results).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        map_rows(&rows)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM latchkey_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::postgres::test_pool;

    fn unique_thread(label: &str) -> String {
        format!("latchkey-test-{label}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_append_builds_chain() {
        let Some(pool) = test_pool().await else { return };
        let repo = PgCheckpointRepository::new(pool);
        let thread = unique_thread("chain");

        let first = repo
            .append(&NewCheckpoint::step(&thread, "extract", json!({"rows": 10})))
            .await
            .unwrap();
        let second = repo
            .append(&NewCheckpoint::terminal(&thread, "load", json!({"rows": 10})))
            .await
            .unwrap();

        assert_eq!(first.checkpoint_id, 1);
        assert_eq!(first.parent_checkpoint_id, None);
        assert_eq!(second.checkpoint_id, 2);
        assert_eq!(second.parent_checkpoint_id, Some(1));

        let latest = repo.get_latest(&thread).await.unwrap().unwrap();
        assert_eq!(latest.namespace, "load");
        assert!(latest.is_terminal);
        assert_eq!(latest.state, json!({"rows": 10}));

        let history = repo.list_thread(&thread).await.unwrap();
        assert_eq!(history.len(), 2);

        assert_eq!(repo.delete_thread(&thread).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_ids() {
        let Some(pool) = test_pool().await else { return };
        let repo = PgCheckpointRepository::new(pool);
        let thread = unique_thread("concurrent");

        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = repo.clone();
            let thread = thread.clone();
            handles.push(tokio::spawn(async move {
                repo.append(&NewCheckpoint::step(thread, format!("s{i}"), json!(i)))
                    .await
                    .unwrap()
                    .checkpoint_id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<i64>>());

        repo.delete_thread(&thread).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_incomplete_skips_terminal_threads() {
        let Some(pool) = test_pool().await else { return };
        let repo = PgCheckpointRepository::new(pool);
        let open = unique_thread("open");
        let done = unique_thread("done");

        repo.append(&NewCheckpoint::step(&open, "a", json!({}))).await.unwrap();
        repo.append(&NewCheckpoint::step(&done, "a", json!({}))).await.unwrap();
        repo.append(&NewCheckpoint::terminal(&done, "b", json!({}))).await.unwrap();

        let incomplete = repo.find_incomplete(1000, None).await.unwrap();
        assert!(incomplete.iter().any(|c| c.thread_id == open));
        assert!(!incomplete.iter().any(|c| c.thread_id == done));

        let future_cutoff = Utc::now() + chrono::Duration::hours(1);
        let filtered = repo.find_incomplete(1000, Some(future_cutoff)).await.unwrap();
        assert!(!filtered.iter().any(|c| c.thread_id == open));

        repo.delete_thread(&open).await.unwrap();
        repo.delete_thread(&done).await.unwrap();
    }
}
