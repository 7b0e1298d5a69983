//! SQLite connections for the checkpoint table.
//!
//! Checkpoint ids are assigned as `MAX + 1` per thread, so two appends to
//! one thread must never interleave. SQLite has no advisory locks to
//! serialize them; instead every write goes through a writer pool capped at
//! one connection. Reads (latest checkpoint, history, incomplete listings)
//! use a separate read-only pool so listing never waits behind an append.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

/// Default size of the read-only pool.
pub const DEFAULT_READER_CONNECTIONS: u32 = 4;

/// How long a statement waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Checkpoint database handle: one serialized writer, several readers.
#[derive(Clone)]
pub struct SqliteStore {
    /// Read-only connections.
    pub reader: SqlitePool,
    /// Single connection; the only path that appends or deletes checkpoints.
    pub writer: SqlitePool,
}

impl SqliteStore {
    /// Open `database_url` with [`DEFAULT_READER_CONNECTIONS`] readers.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::open_with_readers(database_url, DEFAULT_READER_CONNECTIONS).await
    }

    /// Open the writer, bring the checkpoint schema up to date, then open
    /// `readers` read-only connections (at least one).
    ///
    /// WAL journaling lets readers see committed checkpoints while an append
    /// is in progress.
    pub async fn open_with_readers(database_url: &str, readers: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("./migrations/sqlite").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(readers.max(1))
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(url = database_url, readers = readers.max(1), "SQLite checkpoint store opened");
        Ok(Self { reader, writer })
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}
