//! Persistence layer modules.

pub mod agent_repo;
pub mod db;
pub mod job_repo;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Whether a `sqlx` error is a unique-constraint violation.
///
/// Unique violations drive idempotent get-or-create and duplicate-intake
/// detection, so they must be distinguishable from real failures.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
