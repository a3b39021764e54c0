//! Agent-session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One connected agent, stable across reconnects via `agent_instance_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSession {
    /// Unique record identifier.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Live transport-level session identifier; rewritten on reconnect.
    pub transport_session_id: String,
    /// Stable identifier the agent presents on every connect.
    pub agent_instance_id: String,
    /// Repository the agent prefers to work on.
    pub repo_url: Option<String>,
    /// Last heartbeat timestamp.
    pub last_active_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    /// Construct a new agent session with a generated identifier.
    #[must_use]
    pub fn new(
        organization_id: String,
        transport_session_id: String,
        agent_instance_id: String,
        repo_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id,
            transport_session_id,
            agent_instance_id,
            repo_url,
            last_active_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
