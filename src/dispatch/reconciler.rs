//! Periodic reconciliation: queued-job drain, idle sweep, liveness
//! broadcasts, and stale-agent cleanup.
//!
//! One loop, four phases in order. Each phase carries its own error
//! handling so a failing collaborator never starves the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::dispatcher::Dispatcher;
use crate::persistence::agent_repo::AgentRepo;
use crate::persistence::job_repo::JobRepo;
use crate::transport::frame::{frame_type, Frame};
use crate::transport::registry::TransportRegistry;

/// The periodic reconciliation loop.
pub struct Reconciler {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<TransportRegistry>,
    jobs: JobRepo,
    agents: AgentRepo,
    organizations: Vec<String>,
    stale_agent_threshold_minutes: i64,
    idle_job_threshold_minutes: i64,
}

impl Reconciler {
    /// Wire a reconciler from its collaborators.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<TransportRegistry>,
        jobs: JobRepo,
        agents: AgentRepo,
        organizations: Vec<String>,
        stale_agent_threshold_minutes: i64,
        idle_job_threshold_minutes: i64,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            jobs,
            agents,
            organizations,
            stale_agent_threshold_minutes,
            idle_job_threshold_minutes,
        }
    }

    /// Spawn the loop at the given cadence.
    ///
    /// On cancellation the loop finishes the phase it is in, then exits.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }

    /// Run all four phases once, in order.
    pub async fn run_once(&self) {
        self.drain_phase().await;
        self.idle_phase().await;
        self.healthcheck_phase().await;
        self.sweep_phase().await;
    }

    /// Phase 1: hand queued work to whatever capacity appeared.
    async fn drain_phase(&self) {
        for org in &self.organizations {
            match self.dispatcher.drain_queued_jobs(org).await {
                Ok(0) => {}
                Ok(count) => info!(organization_id = %org, count, "drained queued jobs"),
                Err(err) => error!(organization_id = %org, %err, "queued-job drain failed"),
            }
        }
    }

    /// Phase 2: reclaim idle jobs and ask agents to report ones they no
    /// longer hold.
    async fn idle_phase(&self) {
        for org in &self.organizations {
            match self.jobs.idle_jobs(org, self.idle_job_threshold_minutes).await {
                Ok(idle) => {
                    for job in idle {
                        info!(organization_id = %org, job_id = %job.id, "reclaiming idle job");
                        if let Err(err) = self.jobs.delete_job(org, &job.id).await {
                            error!(job_id = %job.id, %err, "failed to delete idle job");
                        }
                    }
                }
                Err(err) => error!(organization_id = %org, %err, "idle-job query failed"),
            }
        }

        match self
            .registry
            .broadcast(|_| true, &Frame::one_shot(frame_type::CHECK_IDLE_JOBS))
            .await
        {
            Ok(count) if count > 0 => debug!(count, "idle-check broadcast delivered"),
            Ok(_) => {}
            Err(err) => error!(%err, "idle-check broadcast failed"),
        }
    }

    /// Phase 3: liveness broadcast; responses refresh `last_active_at`.
    async fn healthcheck_phase(&self) {
        match self
            .registry
            .broadcast(|_| true, &Frame::one_shot(frame_type::HEALTHCHECK_CHECK))
            .await
        {
            Ok(count) if count > 0 => debug!(count, "healthcheck broadcast delivered"),
            Ok(_) => {}
            Err(err) => error!(%err, "healthcheck broadcast failed"),
        }
    }

    /// Phase 4: delete agents that stopped heartbeating or whose transport
    /// session vanished. Assignments cascade away with them.
    async fn sweep_phase(&self) {
        let live = self.registry.list_sessions().await;

        for org in &self.organizations {
            match self
                .agents
                .inactive_agents(org, self.stale_agent_threshold_minutes)
                .await
            {
                Ok(stale) => {
                    for agent in stale {
                        warn!(
                            organization_id = %org,
                            agent_id = %agent.id,
                            last_active_at = %agent.last_active_at,
                            "sweeping stale agent"
                        );
                        if let Err(err) = self.agents.delete(org, &agent.id).await {
                            error!(agent_id = %agent.id, %err, "failed to delete stale agent");
                        }
                    }
                }
                Err(err) => error!(organization_id = %org, %err, "stale-agent query failed"),
            }

            match self.agents.disconnected_agents(org, &live).await {
                Ok(ghosts) => {
                    for agent in ghosts {
                        info!(
                            organization_id = %org,
                            agent_id = %agent.id,
                            "sweeping agent without a live transport session"
                        );
                        if let Err(err) = self.agents.delete(org, &agent.id).await {
                            error!(agent_id = %agent.id, %err, "failed to delete ghost agent");
                        }
                    }
                }
                Err(err) => error!(organization_id = %org, %err, "ghost-agent query failed"),
            }
        }
    }
}
