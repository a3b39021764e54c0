//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Credentials and identity for one tenant organization.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrganizationConfig {
    /// Organization identifier stamped on every persisted row.
    pub id: String,
    /// System secret agents present as a bearer credential on session open.
    pub system_secret: String,
}

/// Nested Slack configuration for the chat adapter.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Bot user token used for posting messages and reactions.
    pub bot_token: String,
}

/// Dispatch-core tunables.
///
/// The idle-job threshold is deployment policy with no safe fallback and
/// must be set explicitly; omitting it (or the whole `[dispatch]` table)
/// is a configuration error. The remaining knobs fall back to production
/// defaults when left out.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Period between outbound retry scans.
    #[serde(default = "default_retry_interval_seconds")]
    pub retry_interval_seconds: u64,
    /// Pending-frame age before a retry is issued.
    #[serde(default = "default_ack_timeout_seconds")]
    pub ack_timeout_seconds: u64,
    /// Hard cap on retries before a pending frame is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Duplicate-suppression window for inbound frame ids.
    #[serde(default = "default_seen_retention_minutes")]
    pub seen_retention_minutes: i64,
    /// Cadence of the seen-id eviction sweep.
    #[serde(default = "default_seen_sweep_interval_minutes")]
    pub seen_sweep_interval_minutes: u64,
    /// Cadence of the reconciler loop.
    #[serde(default = "default_reconciler_interval_seconds")]
    pub reconciler_interval_seconds: u64,
    /// `last_active_at` age beyond which agents are swept.
    #[serde(default = "default_stale_agent_threshold_minutes")]
    pub stale_agent_threshold_minutes: i64,
    /// Job inactivity age before the idle sweep may reclaim it. Required;
    /// must be greater than zero.
    pub idle_job_threshold_minutes: i64,
}

fn default_retry_interval_seconds() -> u64 {
    30
}

fn default_ack_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_seen_retention_minutes() -> i64 {
    30
}

fn default_seen_sweep_interval_minutes() -> u64 {
    5
}

fn default_reconciler_interval_seconds() -> u64 {
    120
}

fn default_stale_agent_threshold_minutes() -> i64 {
    15
}

impl DispatchConfig {
    /// Period between outbound retry scans.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    /// Pending-frame age before a retry is issued.
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_seconds)
    }

    /// Duplicate-suppression window for inbound frame ids.
    #[must_use]
    pub fn seen_retention(&self) -> Duration {
        Duration::from_secs(self.seen_retention_minutes.unsigned_abs() * 60)
    }

    /// Cadence of the seen-id eviction sweep.
    #[must_use]
    pub fn seen_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.seen_sweep_interval_minutes * 60)
    }

    /// Cadence of the reconciler loop.
    #[must_use]
    pub fn reconciler_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler_interval_seconds)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Port the agent transport listener binds to.
    pub http_port: u16,
    /// Tenant organizations allowed to connect agents.
    pub organizations: Vec<OrganizationConfig>,
    /// Slack connectivity; absent means no chat integration is configured.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    /// Dispatch-core tunables. The table is required because the idle-job
    /// threshold carries no default.
    pub dispatch: DispatchConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.organizations.is_empty() {
            return Err(AppError::Config("organizations must not be empty".into()));
        }

        for org in &self.organizations {
            if org.id.is_empty() || org.system_secret.is_empty() {
                return Err(AppError::Config(
                    "organization id and system_secret must not be empty".into(),
                ));
            }
        }

        let mut ids: Vec<&str> = self.organizations.iter().map(|o| o.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.organizations.len() {
            return Err(AppError::Config("organization ids must be unique".into()));
        }

        if self.dispatch.idle_job_threshold_minutes <= 0 {
            return Err(AppError::Config(
                "dispatch.idle_job_threshold_minutes must be greater than zero".into(),
            ));
        }

        if self.dispatch.max_retries == 0 {
            return Err(AppError::Config(
                "dispatch.max_retries must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
