//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates the four tables and their indexes idempotently. Safe to call on
/// every startup. The per-platform thread-key uniqueness is enforced with
/// partial unique indexes, and the at-most-one-assignment-per-job invariant
/// with a unique index on `assignments(job_id)`.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS agent_sessions (
    id                   TEXT PRIMARY KEY NOT NULL,
    organization_id      TEXT NOT NULL,
    transport_session_id TEXT NOT NULL,
    agent_instance_id    TEXT NOT NULL,
    repo_url             TEXT,
    last_active_at       TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    UNIQUE (organization_id, agent_instance_id)
);

CREATE TABLE IF NOT EXISTS jobs (
    id                 TEXT PRIMARY KEY NOT NULL,
    type               TEXT NOT NULL CHECK(type IN ('slack','discord')),
    organization_id    TEXT NOT NULL,
    integration_id     TEXT NOT NULL,
    channel_id         TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    slack_thread_ts    TEXT,
    discord_message_id TEXT,
    discord_thread_id  TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    id               TEXT PRIMARY KEY NOT NULL,
    agent_session_id TEXT NOT NULL,
    job_id           TEXT NOT NULL,
    organization_id  TEXT NOT NULL,
    assigned_at      TEXT NOT NULL,
    UNIQUE (agent_session_id, job_id)
);

CREATE TABLE IF NOT EXISTS processed_messages (
    id              TEXT PRIMARY KEY NOT NULL,
    job_id          TEXT NOT NULL,
    integration_id  TEXT NOT NULL,
    message_key     TEXT NOT NULL,
    text_content    TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('queued','in_progress','completed')),
    organization_id TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (integration_id, message_key)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_slack_thread
    ON jobs(integration_id, slack_thread_ts) WHERE type = 'slack';
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_discord_thread
    ON jobs(integration_id, discord_thread_id) WHERE type = 'discord';
CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_job ON assignments(job_id);
CREATE INDEX IF NOT EXISTS idx_agents_org ON agent_sessions(organization_id, last_active_at);
CREATE INDEX IF NOT EXISTS idx_messages_job_status ON processed_messages(job_id, status);
CREATE INDEX IF NOT EXISTS idx_jobs_org_created ON jobs(organization_id, created_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
