//! Normalized chat message event entering the dispatch pipeline.

use crate::models::job::{JobKind, Platform};

/// One chat message, as delivered by the webhook layer.
///
/// Signature verification and integration→organization resolution happen
/// upstream; the core trusts the fields as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Organization the integration belongs to.
    pub organization_id: String,
    /// Integration the message arrived through.
    pub integration_id: String,
    /// Platform the message originated on.
    pub platform: Platform,
    /// Channel containing the thread.
    pub channel_id: String,
    /// Platform identifier of the thread.
    pub thread_key: String,
    /// Author of the message.
    pub user_id: String,
    /// Message text.
    pub text: String,
    /// Platform key of this specific message, unique per integration.
    pub message_key: String,
    /// Repository the channel is configured for, used as an affinity hint.
    pub repo_url: Option<String>,
}

impl ChatEvent {
    /// Thread coordinates for the job this event belongs to.
    ///
    /// For Discord the thread-spawning message id is taken from this
    /// event's message key — job creation happens on the first message of
    /// a thread.
    #[must_use]
    pub fn job_kind(&self) -> JobKind {
        match self.platform {
            Platform::Slack => JobKind::Slack {
                thread_ts: self.thread_key.clone(),
                channel_id: self.channel_id.clone(),
                user_id: self.user_id.clone(),
                integration_id: self.integration_id.clone(),
            },
            Platform::Discord => JobKind::Discord {
                message_id: self.message_key.clone(),
                channel_id: self.channel_id.clone(),
                thread_id: self.thread_key.clone(),
                user_id: self.user_id.clone(),
                integration_id: self.integration_id.clone(),
            },
        }
    }
}
