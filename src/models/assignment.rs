//! Assignment model binding one agent session to one job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live binding between an agent session and a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Assignment {
    /// Unique record identifier.
    pub id: String,
    /// Assigned agent session.
    pub agent_session_id: String,
    /// Job being worked.
    pub job_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// When the binding was made.
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    /// Construct a new assignment with a generated identifier.
    #[must_use]
    pub fn new(
        agent_session_id: String,
        job_id: String,
        organization_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_session_id,
            job_id,
            organization_id,
            assigned_at: now,
        }
    }
}
