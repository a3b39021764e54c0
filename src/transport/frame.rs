//! JSON frame envelope exchanged with agents.
//!
//! Every frame is a JSON object with at minimum a `type` string. Frames
//! that expect an acknowledgement carry a string `id`; acks echo that id
//! back as a top-level `message_id`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Frame type strings understood by the dispatch core.
pub mod frame_type {
    /// Acknowledgement of a previously received frame.
    pub const ACK: &str = "ack";
    /// First message of a thread handed to a freshly assigned agent.
    pub const START_CONVERSATION: &str = "start_conversation_v1";
    /// Follow-up message for a thread the agent already holds.
    pub const USER_MESSAGE: &str = "user_message_v1";
    /// Agent reply destined for the chat thread.
    pub const ASSISTANT_MESSAGE: &str = "assistant_message_v1";
    /// Agent status text posted with system formatting.
    pub const SYSTEM_MESSAGE: &str = "system_message_v1";
    /// Agent signal that it started working a message.
    pub const PROCESSING_MESSAGE: &str = "processing_message_v1";
    /// Agent signal that it no longer holds a job.
    pub const JOB_COMPLETE: &str = "job_complete_v1";
    /// Agent-initiated liveness probe.
    pub const AGENT_HEALTHCHECK_PING: &str = "agent_healthcheck_ping_v1";
    /// Reply to an agent-initiated liveness probe.
    pub const AGENT_HEALTHCHECK_PONG: &str = "agent_healthcheck_pong_v1";
    /// Agent response to a server healthcheck broadcast.
    pub const HEALTHCHECK_ACK: &str = "healthcheck_ack_v1";
    /// Server broadcast asking agents to report jobs they no longer hold.
    pub const CHECK_IDLE_JOBS: &str = "check_idle_jobs_v1";
    /// Server liveness broadcast.
    pub const HEALTHCHECK_CHECK: &str = "healthcheck_check_v1";
}

/// Wire envelope for one transport frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    /// Present on frames that expect an acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Frame type discriminant.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Id being acknowledged; only set on `ack` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Frame {
    /// Build a frame with a fresh id, suitable for ack-tracked dispatch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the payload fails to serialize.
    pub fn tracked(frame_type: &str, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            id: Some(Uuid::new_v4().to_string()),
            frame_type: frame_type.to_owned(),
            message_id: None,
            payload: Some(encode_payload(payload)?),
        })
    }

    /// Build an id-less frame delivered at most once.
    #[must_use]
    pub fn one_shot(frame_type: &str) -> Self {
        Self {
            id: None,
            frame_type: frame_type.to_owned(),
            message_id: None,
            payload: None,
        }
    }

    /// Build the acknowledgement for a received frame id.
    #[must_use]
    pub fn ack(message_id: &str) -> Self {
        Self {
            id: None,
            frame_type: frame_type::ACK.to_owned(),
            message_id: Some(message_id.to_owned()),
            payload: None,
        }
    }

    /// Parse a frame from its wire text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the text is not a valid envelope.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| AppError::Transport(format!("invalid frame: {err}")))
    }

    /// Serialize the frame to its wire text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| AppError::Transport(format!("failed to encode frame: {err}")))
    }

    /// Deserialize the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the payload is absent or does not
    /// match the expected shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.payload.clone().ok_or_else(|| {
            AppError::Transport(format!("{} frame missing payload", self.frame_type))
        })?;
        serde_json::from_value(payload).map_err(|err| {
            AppError::Transport(format!("invalid {} payload: {err}", self.frame_type))
        })
    }
}

fn encode_payload(payload: &impl Serialize) -> Result<serde_json::Value> {
    serde_json::to_value(payload)
        .map_err(|err| AppError::Transport(format!("failed to encode payload: {err}")))
}

/// Payload of `start_conversation_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartConversationPayload {
    /// Job being handed to the agent.
    pub job_id: String,
    /// Processed message that triggered the hand-off.
    pub processed_message_id: String,
    /// Message text.
    pub message: String,
    /// Repository the thread's channel is configured for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

/// Payload of `user_message_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMessagePayload {
    /// Job the message continues.
    pub job_id: String,
    /// Processed message being routed.
    pub processed_message_id: String,
    /// Message text.
    pub message: String,
}

/// Payload of `assistant_message_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssistantMessagePayload {
    /// Job the reply belongs to.
    pub job_id: String,
    /// Processed message the reply completes, when the agent cites one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_message_id: Option<String>,
    /// Reply text.
    pub message: String,
}

/// Payload of `system_message_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemMessagePayload {
    /// Job the status belongs to.
    pub job_id: String,
    /// Status text.
    pub message: String,
}

/// Payload of `processing_message_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingMessagePayload {
    /// Job the message belongs to.
    pub job_id: String,
    /// Processed message the agent started working.
    pub processed_message_id: String,
}

/// Payload of `job_complete_v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCompletePayload {
    /// Job the agent no longer holds.
    pub job_id: String,
}
