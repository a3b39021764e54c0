//! Injectable wall-clock abstraction.
//!
//! Repositories and the in-memory pending/seen tables read time through a
//! [`Clock`] trait object so that age-based queries (idle jobs, stale
//! agents, retry due-times) are testable without sleeping.

use chrono::{DateTime, Utc};

/// Time source consulted wherever the current instant matters.
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
