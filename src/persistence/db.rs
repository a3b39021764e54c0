//! `SQLite` pool construction for the dispatch store.
//!
//! Every mutation in the system — admissions from the dispatcher, status
//! transitions from agent frames, sweeps from the reconciler — is a short
//! transaction against this one store, and the unique-key races (thread
//! admits, agent reconnects) are resolved by its constraints. WAL mode
//! with a single pooled writer fits that shape: readers never block the
//! writer, and the repositories see conflicts as unique violations rather
//! than lock errors.

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` connection pool.
pub type Database = SqlitePool;

/// How long a connection waits on a locked database before failing.
///
/// The dispatcher and the reconciler commit concurrently; a short busy
/// timeout rides out their overlap instead of surfacing `SQLITE_BUSY` to
/// a frame handler.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a single-writer pool over `opts` and converge the schema.
async fn open(opts: SqliteConnectOptions, keep_alive: bool) -> Result<Database> {
    let mut pool_opts = SqlitePoolOptions::new().max_connections(1);
    if keep_alive {
        // An in-memory database vanishes with its last connection; pin
        // one open for the lifetime of the pool.
        pool_opts = pool_opts.min_connections(1);
    }

    let pool = pool_opts.connect_with(opts).await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Connect to the file-backed dispatch store at `path`.
///
/// Creates missing parent directories and the database file itself, so a
/// fresh deployment needs no setup step beyond pointing `db_path` at a
/// writable location.
///
/// # Errors
///
/// Returns `AppError::Db` if the path is unusable, the connection fails,
/// or the schema cannot be applied.
pub async fn connect(path: &str) -> Result<Database> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
    }

    let opts = SqliteConnectOptions::from_str(path)
        .map_err(|err| AppError::Db(format!("invalid db path '{path}': {err}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    open(opts, false).await
}

/// Connect to a throwaway in-memory store.
///
/// Used by the test suites so every test owns an isolated database with
/// the full schema applied.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection fails or the schema cannot be
/// applied.
pub async fn connect_memory() -> Result<Database> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|err| AppError::Db(format!("invalid memory uri: {err}")))?
        .busy_timeout(BUSY_TIMEOUT);

    open(opts, true).await
}
