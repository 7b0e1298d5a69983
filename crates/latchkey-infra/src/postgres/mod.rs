//! PostgreSQL adapters: advisory-lock sessions and checkpoint storage.

pub mod checkpoint;
pub mod pool;
pub mod session;

pub use checkpoint::PgCheckpointRepository;
pub use pool::PostgresPool;
pub use session::PostgresSession;

/// Test database for integration tests. Tests that need PostgreSQL are
/// skipped when unset.
#[cfg(test)]
pub(crate) const TEST_DATABASE_URL_ENV: &str = "LATCHKEY_TEST_DATABASE_URL";

#[cfg(test)]
pub(crate) async fn test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var(TEST_DATABASE_URL_ENV).ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations/postgres").run(&pool).await.ok()?;
    Some(pool)
}
