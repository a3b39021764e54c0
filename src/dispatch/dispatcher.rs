//! Dispatcher: admits chat messages, binds threads to agents, and routes
//! agent frames back to chat.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chat::event::ChatEvent;
use crate::chat::ChatService;
use crate::models::agent::AgentSession;
use crate::models::job::Job;
use crate::models::message::{MessageStatus, ProcessedMessage};
use crate::persistence::agent_repo::AgentRepo;
use crate::persistence::job_repo::JobRepo;
use crate::transport::frame::{
    frame_type, AssistantMessagePayload, Frame, JobCompletePayload, ProcessingMessagePayload,
    StartConversationPayload, SystemMessagePayload, UserMessagePayload,
};
use crate::transport::inbound::ReliableInbound;
use crate::transport::outbound::OutboundProcessor;
use crate::transport::registry::{SessionContext, TransportRegistry};
use crate::{AppError, Result};

/// Reaction set on a message admitted while no agent capacity exists.
pub const QUEUED_REACTION: &str = "eyes";
/// Reaction set when an agent reports it started working a message.
pub const PROCESSING_REACTION: &str = "hourglass_flowing_sand";

/// Where a chat message should be routed.
enum Route {
    /// The thread's assigned agent is still connected.
    AssignedAgent(AgentSession),
    /// A new agent was selected for the thread.
    FreshAgent(AgentSession),
    /// No connected available agent exists.
    NoCapacity,
}

/// Consumes chat events and inbound agent frames; owns the routing rules.
pub struct Dispatcher {
    jobs: JobRepo,
    agents: AgentRepo,
    registry: Arc<TransportRegistry>,
    outbound: Arc<OutboundProcessor>,
    inbound: Arc<ReliableInbound>,
    chat: ChatService,
}

impl Dispatcher {
    /// Wire a dispatcher from its collaborators.
    #[must_use]
    pub fn new(
        jobs: JobRepo,
        agents: AgentRepo,
        registry: Arc<TransportRegistry>,
        outbound: Arc<OutboundProcessor>,
        inbound: Arc<ReliableInbound>,
        chat: ChatService,
    ) -> Self {
        Self {
            jobs,
            agents,
            registry,
            outbound,
            inbound,
            chat,
        }
    }

    /// Admit one chat message and route it.
    ///
    /// Duplicate intake and missing agent capacity are handled locally:
    /// the former is a silent no-op, the latter leaves the message QUEUED
    /// and marks the chat message with a reaction.
    ///
    /// # Errors
    ///
    /// Returns persistence, transport, or chat errors for everything else.
    pub async fn on_chat_event(&self, event: ChatEvent) -> Result<()> {
        let org = event.organization_id.clone();
        let (job, origin) = self.jobs.get_or_create(&org, &event.job_kind()).await?;
        debug!(job_id = %job.id, ?origin, "chat event admitted");

        let message = match self
            .jobs
            .record_message(&job, &event.message_key, &event.text, MessageStatus::Queued)
            .await
        {
            Ok(message) => message,
            Err(AppError::Duplicate(_)) => {
                debug!(
                    job_id = %job.id,
                    message_key = %event.message_key,
                    "message already admitted"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match self.route_for_job(&job, event.repo_url.as_deref()).await? {
            Route::AssignedAgent(agent) => {
                let payload = UserMessagePayload {
                    job_id: job.id.clone(),
                    processed_message_id: message.id.clone(),
                    message: event.text.clone(),
                };
                let frame = Frame::tracked(frame_type::USER_MESSAGE, &payload)?;
                self.dispatch_to_agent(&org, &job, &message, &agent, frame)
                    .await
            }
            Route::FreshAgent(agent) => {
                self.agents.assign(&org, &agent.id, &job.id).await?;
                let payload = StartConversationPayload {
                    job_id: job.id.clone(),
                    processed_message_id: message.id.clone(),
                    message: event.text.clone(),
                    repo_url: event.repo_url.clone(),
                };
                let frame = Frame::tracked(frame_type::START_CONVERSATION, &payload)?;
                self.dispatch_to_agent(&org, &job, &message, &agent, frame)
                    .await
            }
            Route::NoCapacity => {
                info!(job_id = %job.id, "no agent available; message queued");
                if let Err(err) = self
                    .chat
                    .set_reaction(&event.channel_id, &event.message_key, QUEUED_REACTION)
                    .await
                {
                    debug!(%err, "could not set queued reaction");
                }
                Ok(())
            }
        }
    }

    /// Hand a frame to the outbound processor and advance the message.
    async fn dispatch_to_agent(
        &self,
        organization_id: &str,
        job: &Job,
        message: &ProcessedMessage,
        agent: &AgentSession,
        frame: Frame,
    ) -> Result<()> {
        self.outbound
            .dispatch(&agent.transport_session_id, frame)
            .await?;
        self.jobs
            .transition_message(organization_id, &message.id, MessageStatus::InProgress)
            .await?;
        self.jobs.touch(organization_id, &job.id).await?;
        Ok(())
    }

    /// Resolve which agent should receive a message for `job`.
    async fn route_for_job(&self, job: &Job, repo_hint: Option<&str>) -> Result<Route> {
        let org = job.organization_id.as_str();

        if let Some(assignment) = self.agents.assignment_for_job(org, &job.id).await? {
            if let Some(agent) = self
                .agents
                .get_by_id(org, &assignment.agent_session_id)
                .await?
            {
                if self
                    .registry
                    .session_context(&agent.transport_session_id)
                    .await
                    .is_some()
                {
                    return Ok(Route::AssignedAgent(agent));
                }
            }
            // Prior agent is gone; clear the stale binding before reselecting.
            self.agents.unassign_job(org, &job.id).await?;
        }

        match self.select_agent(org, repo_hint).await? {
            Some(agent) => Ok(Route::FreshAgent(agent)),
            None => Ok(Route::NoCapacity),
        }
    }

    /// Pick a connected, unassigned agent: repo-affinity match first, then
    /// earliest `last_active_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn select_agent(
        &self,
        organization_id: &str,
        repo_hint: Option<&str>,
    ) -> Result<Option<AgentSession>> {
        let live = self.registry.list_sessions().await;
        if live.is_empty() {
            return Ok(None);
        }

        let connected: HashSet<String> = self
            .agents
            .connected_agents(organization_id, &live)
            .await?
            .into_iter()
            .map(|agent| agent.id)
            .collect();

        let mut candidates: Vec<AgentSession> = self
            .agents
            .available_agents(organization_id)
            .await?
            .into_iter()
            .filter(|agent| connected.contains(&agent.id))
            .collect();

        if candidates.is_empty() {
            return Ok(None);
        }

        // Candidates arrive ordered by ascending last_active_at, so the
        // first repo match is also the least-recently-active one.
        if let Some(repo) = repo_hint {
            if let Some(pos) = candidates
                .iter()
                .position(|agent| agent.repo_url.as_deref() == Some(repo))
            {
                return Ok(Some(candidates.swap_remove(pos)));
            }
        }

        Ok(Some(candidates.remove(0)))
    }

    /// Dispatch queued work for an organization while capacity lasts.
    ///
    /// Jobs drain oldest-first; each gets its oldest QUEUED message as a
    /// `start_conversation_v1` hand-off.
    ///
    /// # Errors
    ///
    /// Returns persistence or transport errors.
    pub async fn drain_queued_jobs(&self, organization_id: &str) -> Result<usize> {
        let queued = self.jobs.jobs_with_queued_messages(organization_id).await?;
        let mut drained = 0;

        for job in queued {
            let Some(agent) = self.select_agent(organization_id, None).await? else {
                break;
            };
            let Some(message) = self
                .jobs
                .oldest_queued_message(organization_id, &job.id)
                .await?
            else {
                continue;
            };

            self.agents.unassign_job(organization_id, &job.id).await?;
            self.agents
                .assign(organization_id, &agent.id, &job.id)
                .await?;

            let payload = StartConversationPayload {
                job_id: job.id.clone(),
                processed_message_id: message.id.clone(),
                message: message.text_content.clone(),
                repo_url: None,
            };
            let frame = Frame::tracked(frame_type::START_CONVERSATION, &payload)?;
            self.dispatch_to_agent(organization_id, &job, &message, &agent, frame)
                .await?;

            // The message is no longer waiting; clear its queued marker.
            if let Err(err) = self
                .chat
                .remove_reaction(job.kind.channel_id(), &message.message_key, QUEUED_REACTION)
                .await
            {
                debug!(%err, "could not clear queued reaction");
            }
            drained += 1;
        }

        Ok(drained)
    }

    /// Entry point for every inbound frame from the transport.
    ///
    /// Acks route straight to the outbound processor; everything else goes
    /// through the reliable inbound handler.
    ///
    /// # Errors
    ///
    /// Returns the downstream handling error wrapped with the frame type
    /// and originating session.
    pub async fn on_frame(&self, context: SessionContext, frame: Frame) -> Result<()> {
        if frame.frame_type == frame_type::ACK {
            let Some(message_id) = frame.message_id.as_deref() else {
                warn!(session_id = %context.session_id, "ack frame without message_id");
                return Ok(());
            };
            self.outbound.handle_ack(message_id).await;
            return Ok(());
        }

        let session_id = context.session_id.clone();
        let frame_type_name = frame.frame_type.clone();
        self.inbound
            .process(self.registry.as_ref(), &session_id, frame, |frame| {
                self.handle_agent_frame(&context, frame)
            })
            .await
            .map_err(|err| match err {
                err @ AppError::ChatNotConfigured => err,
                err => AppError::Transport(format!(
                    "while handling {frame_type_name} from {session_id}: {err}"
                )),
            })
    }

    async fn handle_agent_frame(&self, context: &SessionContext, frame: Frame) -> Result<()> {
        let org = context.organization_id.as_str();

        match frame.frame_type.as_str() {
            frame_type::ASSISTANT_MESSAGE => {
                let payload: AssistantMessagePayload = frame.payload_as()?;
                let job = self
                    .jobs
                    .get_by_id(org, &payload.job_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("job {} not found", payload.job_id))
                    })?;

                self.chat
                    .post_message(
                        job.kind.channel_id(),
                        &payload.message,
                        Some(job.kind.thread_key()),
                    )
                    .await?;

                if let Some(message_id) = payload.processed_message_id.as_deref() {
                    self.complete_message(org, message_id).await?;
                }
                Ok(())
            }
            frame_type::SYSTEM_MESSAGE => {
                let payload: SystemMessagePayload = frame.payload_as()?;
                let job = self
                    .jobs
                    .get_by_id(org, &payload.job_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("job {} not found", payload.job_id))
                    })?;

                let text = format!("\u{2699}\u{fe0f} {}", payload.message);
                self.chat
                    .post_message(job.kind.channel_id(), &text, Some(job.kind.thread_key()))
                    .await?;
                Ok(())
            }
            frame_type::PROCESSING_MESSAGE => {
                let payload: ProcessingMessagePayload = frame.payload_as()?;
                let message = self
                    .jobs
                    .get_message(org, &payload.processed_message_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "processed message {} not found",
                            payload.processed_message_id
                        ))
                    })?;
                let job = self
                    .jobs
                    .get_by_id(org, &message.job_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("job {} not found", message.job_id))
                    })?;

                self.chat
                    .set_reaction(
                        job.kind.channel_id(),
                        &message.message_key,
                        PROCESSING_REACTION,
                    )
                    .await?;
                Ok(())
            }
            frame_type::JOB_COMPLETE => {
                let payload: JobCompletePayload = frame.payload_as()?;
                if let Some(agent) = self
                    .agents
                    .get_by_transport_session(org, &context.session_id)
                    .await?
                {
                    self.agents.unassign(org, &agent.id, &payload.job_id).await?;
                }

                let active = self
                    .jobs
                    .active_message_count(org, std::slice::from_ref(&payload.job_id))
                    .await?;
                if active == 0 {
                    info!(job_id = %payload.job_id, "job complete; deleting");
                    self.jobs.delete_job(org, &payload.job_id).await?;
                } else {
                    debug!(
                        job_id = %payload.job_id,
                        active,
                        "job complete reported with messages still active"
                    );
                }
                Ok(())
            }
            frame_type::AGENT_HEALTHCHECK_PING => {
                self.registry
                    .send(
                        &context.session_id,
                        &Frame::one_shot(frame_type::AGENT_HEALTHCHECK_PONG),
                    )
                    .await
            }
            frame_type::HEALTHCHECK_ACK => {
                self.agents.touch_last_active(org, &context.session_id).await
            }
            other => {
                warn!(session_id = %context.session_id, frame_type = other, "unknown frame type");
                Ok(())
            }
        }
    }

    /// Mark a cited processed message COMPLETED, idempotently.
    async fn complete_message(&self, organization_id: &str, message_id: &str) -> Result<()> {
        let Some(message) = self.jobs.get_message(organization_id, message_id).await? else {
            warn!(message_id, "agent cited an unknown processed message");
            return Ok(());
        };
        if message.status == MessageStatus::Completed {
            return Ok(());
        }
        self.jobs
            .transition_message(organization_id, message_id, MessageStatus::Completed)
            .await?;
        Ok(())
    }

    /// Persist the agent row when its transport session opens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn on_session_open(&self, context: SessionContext) -> Result<()> {
        let agent = self
            .agents
            .upsert(
                &context.organization_id,
                &context.session_id,
                &context.agent_instance_id,
                context.repo_url.as_deref(),
            )
            .await?;
        info!(
            agent_id = %agent.id,
            session_id = %context.session_id,
            agent_instance_id = %context.agent_instance_id,
            "agent registered"
        );
        Ok(())
    }

    /// Tear down per-session state when its transport session closes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn on_session_close(&self, context: SessionContext) -> Result<()> {
        self.outbound.drop_session(&context.session_id).await;
        self.agents
            .delete_by_transport_session(&context.organization_id, &context.session_id)
            .await?;
        info!(session_id = %context.session_id, "agent session state cleaned up");
        Ok(())
    }
}
