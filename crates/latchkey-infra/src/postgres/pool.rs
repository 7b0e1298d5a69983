//! PostgreSQL connection pool exposed as a [`SessionPool`].

use latchkey_core::pool::SessionPool;
use latchkey_types::config::PoolConfig;
use latchkey_types::error::RepositoryError;
use latchkey_types::health::PoolMetrics;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::session::PostgresSession;
use crate::error::map_sqlx_error;

/// sqlx-backed pool handing out [`PostgresSession`]s.
///
/// Cloning shares the underlying pool, so lock sessions and the checkpoint
/// repository can draw from the same connections.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
    min_connections: u32,
    max_connections: u32,
}

impl PostgresPool {
    /// Open a pool with the configured bounds. `config` is expected to be
    /// validated already.
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "PostgreSQL pool opened"
        );

        Ok(Self::from_pool(pool, config))
    }

    /// Wrap an existing pool. `config` supplies the reported bounds.
    pub fn from_pool(pool: PgPool, config: &PoolConfig) -> Self {
        Self {
            pool,
            min_connections: config.min_connections,
            max_connections: config.max_connections,
        }
    }

    /// Create the checkpoint table if it does not exist.
    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Query(format!("migration failed: {e}")))?;
        tracing::debug!("PostgreSQL migrations applied");
        Ok(())
    }

    pub fn pg_pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SessionPool for PostgresPool {
    type Session = PostgresSession;

    async fn acquire(&self) -> Result<PostgresSession, RepositoryError> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(PostgresSession::new(conn))
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            size: self.pool.size(),
            idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
