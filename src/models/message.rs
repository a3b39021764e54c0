//! Processed-message model and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a processed message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Admitted but waiting for agent capacity.
    Queued,
    /// Dispatched to an agent.
    InProgress,
    /// The agent finished responding to it.
    Completed,
}

impl MessageStatus {
    /// Whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::InProgress) | (Self::InProgress, Self::Completed)
        )
    }

    /// Database string for the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// One chat message admitted into the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessedMessage {
    /// Unique record identifier.
    pub id: String,
    /// Job the message belongs to.
    pub job_id: String,
    /// Integration the message arrived through.
    pub integration_id: String,
    /// Chat-side message key, unique per integration.
    pub message_key: String,
    /// Raw message text handed to the agent.
    pub text_content: String,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// Owning organization.
    pub organization_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status-change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ProcessedMessage {
    /// Construct a new record with a generated identifier.
    #[must_use]
    pub fn new(
        job_id: String,
        integration_id: String,
        message_key: String,
        text_content: String,
        status: MessageStatus,
        organization_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            integration_id,
            message_key,
            text_content,
            status,
            organization_id,
            created_at: now,
            updated_at: now,
        }
    }
}
