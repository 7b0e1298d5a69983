//! Advisory-lock primitives on one PostgreSQL connection.
//!
//! Session-level advisory locks (`pg_advisory_lock` and friends) belong to
//! the backend process that took them. They are released by an explicit
//! unlock or when the connection ends, which is what [`PostgresSession::discard`]
//! relies on.

use latchkey_core::pool::LockSession;
use latchkey_types::error::RepositoryError;
use latchkey_types::lock::LockKey;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;

use crate::error::map_sqlx_error;

// A bigint advisory key is reported in pg_locks split across classid (high
// 32 bits) and objid (low 32 bits), with objsubid = 1.
const HOLDS_SQL: &str = "\
SELECT EXISTS (
    SELECT 1 FROM pg_locks
    WHERE locktype = 'advisory'
      AND classid::bigint = (($1::bigint >> 32) & 4294967295)
      AND objid::bigint = ($1::bigint & 4294967295)
      AND objsubid = 1
      AND pid = pg_backend_pid()
      AND granted
)";

/// A pooled PostgreSQL connection used for advisory locks.
pub struct PostgresSession {
    conn: PoolConnection<Postgres>,
}

impl PostgresSession {
    pub(crate) fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn }
    }
}

impl LockSession for PostgresSession {
    async fn try_lock(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key.value())
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)
    }

    async fn lock(&mut self, key: LockKey) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key.value())
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn unlock(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(key.value())
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)
    }

    async fn holds(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(HOLDS_SQL)
            .bind(key.value())
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)
    }

    async fn ping(&mut self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    fn discard(self) {
        // Detached connections are closed on drop instead of returning to the
        // pool; the backend exits and releases its advisory locks.
        drop(self.conn.detach());
    }
}
