//! Agent-session and assignment repository for `SQLite` persistence.
//!
//! Agent presence is keyed by `(organization_id, agent_instance_id)` so a
//! reconnecting agent updates its transport session in place. Assignments
//! bind agents to jobs; an agent with zero assignments is available.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::models::agent::AgentSession;
use crate::models::assignment::Assignment;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for agent sessions and assignments.
#[derive(Clone)]
pub struct AgentRepo {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    organization_id: String,
    transport_session_id: String,
    agent_instance_id: String,
    repo_url: Option<String>,
    last_active_at: String,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    fn into_agent(self) -> Result<AgentSession> {
        Ok(AgentSession {
            id: self.id,
            organization_id: self.organization_id,
            transport_session_id: self.transport_session_id,
            agent_instance_id: self.agent_instance_id,
            repo_url: self.repo_url,
            last_active_at: parse_timestamp(&self.last_active_at, "last_active_at")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

/// Internal row struct for assignments.
#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: String,
    agent_session_id: String,
    job_id: String,
    organization_id: String,
    assigned_at: String,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: self.id,
            agent_session_id: self.agent_session_id,
            job_id: self.job_id,
            organization_id: self.organization_id,
            assigned_at: parse_timestamp(&self.assigned_at, "assigned_at")?,
        })
    }
}

/// Parse an RFC3339 timestamp column.
fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Build a numbered placeholder list `?N, ?N+1, …` starting at `start`.
fn placeholders(count: usize, start: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + start))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AgentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create or refresh the agent row for `(organization_id,
    /// agent_instance_id)`, writing the new transport session in place.
    ///
    /// Uses `INSERT … ON CONFLICT DO UPDATE` so concurrent reconnects
    /// never race a read-then-write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn upsert(
        &self,
        organization_id: &str,
        transport_session_id: &str,
        agent_instance_id: &str,
        repo_url: Option<&str>,
    ) -> Result<AgentSession> {
        let fresh = AgentSession::new(
            organization_id.to_owned(),
            transport_session_id.to_owned(),
            agent_instance_id.to_owned(),
            repo_url.map(str::to_owned),
            self.clock.now(),
        );

        sqlx::query(
            "INSERT INTO agent_sessions (id, organization_id, transport_session_id,
             agent_instance_id, repo_url, last_active_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (organization_id, agent_instance_id) DO UPDATE SET
               transport_session_id = excluded.transport_session_id,
               repo_url = excluded.repo_url,
               last_active_at = excluded.last_active_at,
               updated_at = excluded.updated_at",
        )
        .bind(&fresh.id)
        .bind(&fresh.organization_id)
        .bind(&fresh.transport_session_id)
        .bind(&fresh.agent_instance_id)
        .bind(&fresh.repo_url)
        .bind(fresh.last_active_at.to_rfc3339())
        .bind(fresh.created_at.to_rfc3339())
        .bind(fresh.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        self.get_by_instance(organization_id, agent_instance_id)
            .await?
            .ok_or_else(|| {
                AppError::Db(format!("agent {agent_instance_id} missing after upsert"))
            })
    }

    /// Retrieve an agent by record identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_by_id(
        &self,
        organization_id: &str,
        id: &str,
    ) -> Result<Option<AgentSession>> {
        let row: Option<AgentRow> =
            sqlx::query_as("SELECT * FROM agent_sessions WHERE id = ?1 AND organization_id = ?2")
                .bind(id)
                .bind(organization_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(AgentRow::into_agent).transpose()
    }

    /// Retrieve an agent by its stable instance identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_by_instance(
        &self,
        organization_id: &str,
        agent_instance_id: &str,
    ) -> Result<Option<AgentSession>> {
        let row: Option<AgentRow> = sqlx::query_as(
            "SELECT * FROM agent_sessions
             WHERE organization_id = ?1 AND agent_instance_id = ?2",
        )
        .bind(organization_id)
        .bind(agent_instance_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(AgentRow::into_agent).transpose()
    }

    /// Retrieve an agent by its live transport session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_by_transport_session(
        &self,
        organization_id: &str,
        transport_session_id: &str,
    ) -> Result<Option<AgentSession>> {
        let row: Option<AgentRow> = sqlx::query_as(
            "SELECT * FROM agent_sessions
             WHERE organization_id = ?1 AND transport_session_id = ?2",
        )
        .bind(organization_id)
        .bind(transport_session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(AgentRow::into_agent).transpose()
    }

    /// Bump the heartbeat timestamp of the agent on a transport session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn touch_last_active(
        &self,
        organization_id: &str,
        transport_session_id: &str,
    ) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        sqlx::query(
            "UPDATE agent_sessions SET last_active_at = ?1, updated_at = ?1
             WHERE organization_id = ?2 AND transport_session_id = ?3",
        )
        .bind(&now)
        .bind(organization_id)
        .bind(transport_session_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Bind an agent to a job. A second assign of the same pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure, including an attempt to
    /// assign a second agent to a job that already has one.
    pub async fn assign(
        &self,
        organization_id: &str,
        agent_session_id: &str,
        job_id: &str,
    ) -> Result<()> {
        let assignment = Assignment::new(
            agent_session_id.to_owned(),
            job_id.to_owned(),
            organization_id.to_owned(),
            self.clock.now(),
        );

        sqlx::query(
            "INSERT INTO assignments (id, agent_session_id, job_id, organization_id, assigned_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (agent_session_id, job_id) DO NOTHING",
        )
        .bind(&assignment.id)
        .bind(&assignment.agent_session_id)
        .bind(&assignment.job_id)
        .bind(&assignment.organization_id)
        .bind(assignment.assigned_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Remove the binding between an agent and a job, if present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn unassign(
        &self,
        organization_id: &str,
        agent_session_id: &str,
        job_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM assignments
             WHERE agent_session_id = ?1 AND job_id = ?2 AND organization_id = ?3",
        )
        .bind(agent_session_id)
        .bind(job_id)
        .bind(organization_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Remove whatever assignment a job holds, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn unassign_job(&self, organization_id: &str, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM assignments WHERE job_id = ?1 AND organization_id = ?2")
            .bind(job_id)
            .bind(organization_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// The live assignment for a job, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn assignment_for_job(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> Result<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM assignments WHERE job_id = ?1 AND organization_id = ?2",
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(AssignmentRow::into_assignment).transpose()
    }

    /// Agents with zero live assignments, earliest heartbeat first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn available_agents(&self, organization_id: &str) -> Result<Vec<AgentSession>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agent_sessions ag
             WHERE ag.organization_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM assignments a WHERE a.agent_session_id = ag.id
               )
             ORDER BY ag.last_active_at ASC, ag.id ASC",
        )
        .bind(organization_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Agents whose transport session is in the given live set.
    ///
    /// Bridges registry liveness with persisted presence.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn connected_agents(
        &self,
        organization_id: &str,
        live_session_ids: &[String],
    ) -> Result<Vec<AgentSession>> {
        if live_session_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM agent_sessions
             WHERE organization_id = ?1 AND transport_session_id IN ({})
             ORDER BY last_active_at ASC, id ASC",
            placeholders(live_session_ids.len(), 2)
        );

        let mut query = sqlx::query_as(&sql).bind(organization_id);
        for id in live_session_ids {
            query = query.bind(id);
        }

        let rows: Vec<AgentRow> = query.fetch_all(self.db.as_ref()).await?;
        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Agents whose transport session is NOT in the given live set.
    ///
    /// Used by the reconciler to sweep rows whose connection vanished
    /// without a close.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn disconnected_agents(
        &self,
        organization_id: &str,
        live_session_ids: &[String],
    ) -> Result<Vec<AgentSession>> {
        let rows: Vec<AgentRow> = if live_session_ids.is_empty() {
            sqlx::query_as("SELECT * FROM agent_sessions WHERE organization_id = ?1")
                .bind(organization_id)
                .fetch_all(self.db.as_ref())
                .await?
        } else {
            let sql = format!(
                "SELECT * FROM agent_sessions
                 WHERE organization_id = ?1 AND transport_session_id NOT IN ({})",
                placeholders(live_session_ids.len(), 2)
            );
            let mut query = sqlx::query_as(&sql).bind(organization_id);
            for id in live_session_ids {
                query = query.bind(id);
            }
            query.fetch_all(self.db.as_ref()).await?
        };

        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Agents whose heartbeat is older than the threshold.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn inactive_agents(
        &self,
        organization_id: &str,
        threshold_minutes: i64,
    ) -> Result<Vec<AgentSession>> {
        let cutoff = (self.clock.now() - chrono::Duration::minutes(threshold_minutes)).to_rfc3339();

        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agent_sessions
             WHERE organization_id = ?1 AND last_active_at < ?2",
        )
        .bind(organization_id)
        .bind(&cutoff)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Delete an agent row, cascading to its assignments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn delete(&self, organization_id: &str, agent_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "DELETE FROM assignments WHERE agent_session_id = ?1 AND organization_id = ?2",
        )
        .bind(agent_id)
        .bind(organization_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM agent_sessions WHERE id = ?1 AND organization_id = ?2")
            .bind(agent_id)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete the agent row bound to a transport session, cascading to its
    /// assignments. A no-op when the session never registered an agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn delete_by_transport_session(
        &self,
        organization_id: &str,
        transport_session_id: &str,
    ) -> Result<()> {
        if let Some(agent) = self
            .get_by_transport_session(organization_id, transport_session_id)
            .await?
        {
            self.delete(organization_id, &agent.id).await?;
        }
        Ok(())
    }
}
