//! Job and processed-message repository for `SQLite` persistence.
//!
//! The Job Store owns the thread↔job binding and the processed-message
//! queue whose statuses govern the job lifecycle. Every query is scoped by
//! `organization_id`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::models::job::{Job, JobKind, Platform};
use crate::models::message::{MessageStatus, ProcessedMessage};
use crate::{AppError, Result};

use super::db::Database;
use super::is_unique_violation;

/// Outcome of [`JobRepo::get_or_create`], disambiguating the first message
/// in a thread from a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    /// The job was created by this call.
    Created,
    /// The job already existed.
    Existing,
}

/// Repository wrapper around `SQLite` for jobs and processed messages.
#[derive(Clone)]
pub struct JobRepo {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    #[sqlx(rename = "type")]
    job_type: String,
    organization_id: String,
    integration_id: String,
    channel_id: String,
    user_id: String,
    slack_thread_ts: Option<String>,
    discord_message_id: Option<String>,
    discord_thread_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    /// Convert a database row into the domain model.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the type discriminant is unknown, a
    /// platform column required by it is NULL, or a timestamp is invalid.
    fn into_job(self) -> Result<Job> {
        let kind = match self.job_type.as_str() {
            "slack" => JobKind::Slack {
                thread_ts: self
                    .slack_thread_ts
                    .ok_or_else(|| AppError::Db("slack job missing thread_ts".into()))?,
                channel_id: self.channel_id,
                user_id: self.user_id,
                integration_id: self.integration_id,
            },
            "discord" => JobKind::Discord {
                message_id: self
                    .discord_message_id
                    .ok_or_else(|| AppError::Db("discord job missing message_id".into()))?,
                channel_id: self.channel_id,
                thread_id: self
                    .discord_thread_id
                    .ok_or_else(|| AppError::Db("discord job missing thread_id".into()))?,
                user_id: self.user_id,
                integration_id: self.integration_id,
            },
            other => return Err(AppError::Db(format!("invalid job type: {other}"))),
        };

        Ok(Job {
            id: self.id,
            organization_id: self.organization_id,
            kind,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

/// Internal row struct for processed messages.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    job_id: String,
    integration_id: String,
    message_key: String,
    text_content: String,
    status: String,
    organization_id: String,
    created_at: String,
    updated_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<ProcessedMessage> {
        Ok(ProcessedMessage {
            id: self.id,
            job_id: self.job_id,
            integration_id: self.integration_id,
            message_key: self.message_key,
            text_content: self.text_content,
            status: parse_status(&self.status)?,
            organization_id: self.organization_id,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

/// Parse an RFC3339 timestamp column.
fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Parse a status string into the domain enum.
fn parse_status(s: &str) -> Result<MessageStatus> {
    match s {
        "queued" => Ok(MessageStatus::Queued),
        "in_progress" => Ok(MessageStatus::InProgress),
        "completed" => Ok(MessageStatus::Completed),
        other => Err(AppError::Db(format!("invalid message status: {other}"))),
    }
}

impl JobRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Atomically return the job for a thread, creating it if absent.
    ///
    /// Concurrent callers racing on the same thread-key are serialized by
    /// the per-platform unique index: the loser's insert fails with a
    /// unique violation and falls back to reading the winner's row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_or_create(
        &self,
        organization_id: &str,
        kind: &JobKind,
    ) -> Result<(Job, JobOrigin)> {
        let job = Job::new(organization_id.to_owned(), kind.clone(), self.clock.now());

        match self.insert(&job).await {
            Ok(()) => Ok((job, JobOrigin::Created)),
            Err(AppError::Duplicate(_)) => {
                match self.find_by_thread(organization_id, kind).await? {
                    Some(existing) => Ok((existing, JobOrigin::Existing)),
                    None => Err(AppError::Db(format!(
                        "job insert conflicted but no existing row for thread {}",
                        kind.thread_key()
                    ))),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let (slack_thread_ts, discord_message_id, discord_thread_id) = match &job.kind {
            JobKind::Slack { thread_ts, .. } => (Some(thread_ts.as_str()), None, None),
            JobKind::Discord {
                message_id,
                thread_id,
                ..
            } => (None, Some(message_id.as_str()), Some(thread_id.as_str())),
        };

        let result = sqlx::query(
            "INSERT INTO jobs (id, type, organization_id, integration_id, channel_id, user_id,
             slack_thread_ts, discord_message_id, discord_thread_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&job.id)
        .bind(job.kind.platform().as_str())
        .bind(&job.organization_id)
        .bind(job.kind.integration_id())
        .bind(job.kind.channel_id())
        .bind(job.kind.user_id())
        .bind(slack_thread_ts)
        .bind(discord_message_id)
        .bind(discord_thread_id)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(AppError::Duplicate(format!(
                    "job already exists for thread {}",
                    job.kind.thread_key()
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find the job bound to a thread, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn find_by_thread(
        &self,
        organization_id: &str,
        kind: &JobKind,
    ) -> Result<Option<Job>> {
        let sql = match kind.platform() {
            Platform::Slack => {
                "SELECT * FROM jobs WHERE organization_id = ?1 AND type = 'slack'
                 AND integration_id = ?2 AND slack_thread_ts = ?3"
            }
            Platform::Discord => {
                "SELECT * FROM jobs WHERE organization_id = ?1 AND type = 'discord'
                 AND integration_id = ?2 AND discord_thread_id = ?3"
            }
        };

        let row: Option<JobRow> = sqlx::query_as(sql)
            .bind(organization_id)
            .bind(kind.integration_id())
            .bind(kind.thread_key())
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(JobRow::into_job).transpose()
    }

    /// Retrieve a job by identifier.
    ///
    /// Returns `Ok(None)` if the job does not exist in this organization.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_by_id(&self, organization_id: &str, id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as("SELECT * FROM jobs WHERE id = ?1 AND organization_id = ?2")
                .bind(id)
                .bind(organization_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(JobRow::into_job).transpose()
    }

    /// Insert one processed-message record for a job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Duplicate` if the `(integration_id, message_key)`
    /// pair has already been admitted, `AppError::Db` on other failures.
    pub async fn record_message(
        &self,
        job: &Job,
        message_key: &str,
        text_content: &str,
        initial_status: MessageStatus,
    ) -> Result<ProcessedMessage> {
        let message = ProcessedMessage::new(
            job.id.clone(),
            job.kind.integration_id().to_owned(),
            message_key.to_owned(),
            text_content.to_owned(),
            initial_status,
            job.organization_id.clone(),
            self.clock.now(),
        );

        let result = sqlx::query(
            "INSERT INTO processed_messages (id, job_id, integration_id, message_key,
             text_content, status, organization_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&message.id)
        .bind(&message.job_id)
        .bind(&message.integration_id)
        .bind(&message.message_key)
        .bind(&message.text_content)
        .bind(message.status.as_str())
        .bind(&message.organization_id)
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await;

        match result {
            Ok(_) => Ok(message),
            Err(err) if is_unique_violation(&err) => Err(AppError::Duplicate(format!(
                "message {message_key} already admitted"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Retrieve a processed message by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn get_message(
        &self,
        organization_id: &str,
        id: &str,
    ) -> Result<Option<ProcessedMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT * FROM processed_messages WHERE id = ?1 AND organization_id = ?2",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Move a processed message to a new status.
    ///
    /// Only QUEUED→IN_PROGRESS and IN_PROGRESS→COMPLETED are permitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the message does not exist,
    /// `AppError::InvalidTransition` if the transition is not allowed, and
    /// `AppError::Db` on query failure.
    pub async fn transition_message(
        &self,
        organization_id: &str,
        id: &str,
        next: MessageStatus,
    ) -> Result<ProcessedMessage> {
        let current = self
            .get_message(organization_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("processed message {id} not found")))?;

        if !current.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "processed message {id}: {} -> {}",
                current.status.as_str(),
                next.as_str()
            )));
        }

        let now = self.clock.now().to_rfc3339();
        sqlx::query(
            "UPDATE processed_messages SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND organization_id = ?4",
        )
        .bind(next.as_str())
        .bind(&now)
        .bind(id)
        .bind(organization_id)
        .execute(self.db.as_ref())
        .await?;

        self.get_message(organization_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("processed message {id} lost after update")))
    }

    /// The oldest QUEUED message for a job, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn oldest_queued_message(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> Result<Option<ProcessedMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT * FROM processed_messages
             WHERE job_id = ?1 AND organization_id = ?2 AND status = 'queued'
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Jobs whose last activity is older than the threshold and whose
    /// processed messages are absent or all COMPLETED and equally old.
    ///
    /// A job with any QUEUED or IN_PROGRESS message is never idle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `min_age_minutes` is not positive,
    /// `AppError::Db` on query failure.
    pub async fn idle_jobs(&self, organization_id: &str, min_age_minutes: i64) -> Result<Vec<Job>> {
        if min_age_minutes <= 0 {
            return Err(AppError::Config(
                "idle-job threshold must be greater than zero".into(),
            ));
        }

        let cutoff = (self.clock.now() - chrono::Duration::minutes(min_age_minutes)).to_rfc3339();

        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs j
             WHERE j.organization_id = ?1
               AND j.updated_at < ?2
               AND NOT EXISTS (
                   SELECT 1 FROM processed_messages m
                   WHERE m.job_id = j.id
                     AND (m.status != 'completed' OR m.updated_at >= ?2)
               )
             ORDER BY j.created_at ASC, j.id ASC",
        )
        .bind(organization_id)
        .bind(&cutoff)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Jobs holding at least one QUEUED message, oldest job first.
    ///
    /// Ordering is by ascending `created_at` then id so the drain loop is
    /// deterministic and older jobs get capacity first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn jobs_with_queued_messages(&self, organization_id: &str) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs
             WHERE organization_id = ?1
               AND id IN (
                   SELECT job_id FROM processed_messages
                   WHERE organization_id = ?1 AND status = 'queued'
               )
             ORDER BY created_at ASC, id ASC",
        )
        .bind(organization_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Count non-COMPLETED messages across the given jobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn active_message_count(
        &self,
        organization_id: &str,
        job_ids: &[String],
    ) -> Result<i64> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = (0..job_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM processed_messages
             WHERE organization_id = ?1 AND status != 'completed' AND job_id IN ({placeholders})"
        );

        let mut query = sqlx::query_scalar(&sql).bind(organization_id);
        for id in job_ids {
            query = query.bind(id);
        }

        let count: i64 = query.fetch_one(self.db.as_ref()).await?;
        Ok(count)
    }

    /// Delete a job, cascading to its processed messages and assignment.
    ///
    /// Deleting a job that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn delete_job(&self, organization_id: &str, id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM processed_messages WHERE job_id = ?1 AND organization_id = ?2")
            .bind(id)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM assignments WHERE job_id = ?1 AND organization_id = ?2")
            .bind(id)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?1 AND organization_id = ?2")
            .bind(id)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Bump a job's `updated_at` to now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure.
    pub async fn touch(&self, organization_id: &str, id: &str) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        sqlx::query("UPDATE jobs SET updated_at = ?1 WHERE id = ?2 AND organization_id = ?3")
            .bind(&now)
            .bind(id)
            .bind(organization_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
