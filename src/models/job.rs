//! Job model — the binding between a chat thread and the work done for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat platform a job originates from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Slack workspace thread.
    Slack,
    /// Discord channel thread.
    Discord,
}

impl Platform {
    /// Database string for the platform discriminant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Discord => "discord",
        }
    }
}

/// Platform-specific thread coordinates carried by a job.
///
/// The thread-key — the identifier that uniquely names the chat thread
/// within its integration — is `thread_ts` for Slack and `thread_id` for
/// Discord.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JobKind {
    /// Slack thread coordinates.
    Slack {
        /// Timestamp of the thread's root message.
        thread_ts: String,
        /// Channel containing the thread.
        channel_id: String,
        /// User who started the thread.
        user_id: String,
        /// Slack integration the thread belongs to.
        integration_id: String,
    },
    /// Discord thread coordinates.
    Discord {
        /// Message that spawned the thread.
        message_id: String,
        /// Channel containing the thread.
        channel_id: String,
        /// Discord thread identifier.
        thread_id: String,
        /// User who started the thread.
        user_id: String,
        /// Discord integration the thread belongs to.
        integration_id: String,
    },
}

impl JobKind {
    /// Platform discriminant for this kind.
    #[must_use]
    pub fn platform(&self) -> Platform {
        match self {
            Self::Slack { .. } => Platform::Slack,
            Self::Discord { .. } => Platform::Discord,
        }
    }

    /// Integration the thread belongs to.
    #[must_use]
    pub fn integration_id(&self) -> &str {
        match self {
            Self::Slack { integration_id, .. } | Self::Discord { integration_id, .. } => {
                integration_id
            }
        }
    }

    /// Channel containing the thread.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Slack { channel_id, .. } | Self::Discord { channel_id, .. } => channel_id,
        }
    }

    /// User who started the thread.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Slack { user_id, .. } | Self::Discord { user_id, .. } => user_id,
        }
    }

    /// Platform-specific identifier that uniquely names the thread within
    /// its integration.
    #[must_use]
    pub fn thread_key(&self) -> &str {
        match self {
            Self::Slack { thread_ts, .. } => thread_ts,
            Self::Discord { thread_id, .. } => thread_id,
        }
    }
}

/// A chat thread being worked by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Job {
    /// Unique record identifier.
    pub id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Platform-specific thread coordinates.
    pub kind: JobKind,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last dispatch activity timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Construct a new job with a generated identifier.
    #[must_use]
    pub fn new(organization_id: String, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id,
            kind,
            created_at: now,
            updated_at: now,
        }
    }
}
