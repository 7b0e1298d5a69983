//! SQLite checkpoint repository implementation.
//!
//! State is stored as JSON text and timestamps as RFC3339 UTC text with
//! microsecond precision. The fixed width keeps lexicographic order equal to
//! chronological order, which the age filter and sorting rely on.

use chrono::{DateTime, SecondsFormat, Utc};
use latchkey_core::checkpoint::CheckpointRepository;
use latchkey_types::checkpoint::{Checkpoint, NewCheckpoint};
use latchkey_types::error::RepositoryError;
use sqlx::Row;

use super::pool::SqliteStore;
use crate::error::map_sqlx_error;

/// SQLite-backed implementation of [`CheckpointRepository`].
#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    store: SqliteStore,
}

impl SqliteCheckpointRepository {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    thread_id: String,
    checkpoint_id: i64,
    namespace: String,
    parent_checkpoint_id: Option<i64>,
    state: String,
    is_terminal: bool,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
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

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let state = serde_json::from_str(&self.state)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint state JSON: {e}")))?;
        Ok(Checkpoint {
            thread_id: self.thread_id,
            checkpoint_id: self.checkpoint_id,
            namespace: self.namespace,
            parent_checkpoint_id: self.parent_checkpoint_id,
            state,
            is_terminal: self.is_terminal,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn map_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Checkpoint>, RepositoryError> {
    rows.iter()
        .map(|row| {
            CheckpointRow::from_row(row)
                .map_err(map_sqlx_error)?
                .into_checkpoint()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const SELECT_COLUMNS: &str = "SELECT c.thread_id, c.checkpoint_id, c.namespace, \
    c.parent_checkpoint_id, c.state, c.is_terminal, c.created_at \
    FROM latchkey_checkpoints c";

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn append(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
        let state = serde_json::to_string(&checkpoint.state)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize state: {e}")))?;
        let created_at = Utc::now();

        // The single writer connection serializes appends; the transaction
        // keeps the MAX read and the insert together.
        let mut tx = self.store.writer.begin().await.map_err(map_sqlx_error)?;

        let parent: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(checkpoint_id) FROM latchkey_checkpoints WHERE thread_id = ?",
        )
        .bind(&checkpoint.thread_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let checkpoint_id = parent.map_or(1, |id| id + 1);

        sqlx::query(
            r#"INSERT INTO latchkey_checkpoints
               (thread_id, checkpoint_id, namespace, parent_checkpoint_id, state, is_terminal, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint_id)
        .bind(&checkpoint.namespace)
        .bind(parent)
        .bind(&state)
        .bind(checkpoint.is_terminal)
        .bind(format_datetime(&created_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id,
            namespace = %checkpoint.namespace,
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
            "{SELECT_COLUMNS} WHERE c.thread_id = ? ORDER BY c.checkpoint_id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&self.store.reader)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(r) => {
                let row = CheckpointRow::from_row(&r).map_err(map_sqlx_error)?;
                Ok(Some(row.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Checkpoint>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE c.thread_id = ? ORDER BY c.checkpoint_id ASC");
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_all(&self.store.reader)
            .await
            .map_err(map_sqlx_error)?;
        map_rows(&rows)
    }

    async fn find_incomplete(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let cutoff = created_after.as_ref().map(format_datetime);
        let sql = format!(
            "{SELECT_COLUMNS} \
             JOIN (SELECT thread_id, MAX(checkpoint_id) AS latest \
                   FROM latchkey_checkpoints GROUP BY thread_id) l \
               ON c.thread_id = l.thread_id AND c.checkpoint_id = l.latest \
             WHERE c.is_terminal = 0 AND (? IS NULL OR c.created_at >= ?) \
             ORDER BY c.created_at DESC, c.rowid DESC \
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&cutoff)
            .bind(&cutoff)
            .bind(i64::try_from(max_results).unwrap_or(i64::MAX))
            .fetch_all(&self.store.reader)
            .await
            .map_err(map_sqlx_error)?;
        map_rows(&rows)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM latchkey_checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.store.writer)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
