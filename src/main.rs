#![forbid(unsafe_code)]

//! `agent-dispatch` — dispatch control plane binary.
//!
//! Bootstraps configuration, the `SQLite` store, the agent transport
//! listener, and the background loops (retry, seen-id sweep, reconciler).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_dispatch::chat::slack::SlackAdapter;
use agent_dispatch::chat::ChatService;
use agent_dispatch::clock::SystemClock;
use agent_dispatch::config::GlobalConfig;
use agent_dispatch::dispatch::dispatcher::Dispatcher;
use agent_dispatch::dispatch::reconciler::Reconciler;
use agent_dispatch::persistence::agent_repo::AgentRepo;
use agent_dispatch::persistence::job_repo::JobRepo;
use agent_dispatch::persistence::db;
use agent_dispatch::transport::inbound::{spawn_seen_sweeper, ReliableInbound};
use agent_dispatch::transport::outbound::{spawn_retry_task, OutboundProcessor};
use agent_dispatch::transport::registry::{self, StaticSecretValidator, TransportRegistry};
use agent_dispatch::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-dispatch", about = "Dispatch control plane for coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `config.toml` in the current working directory.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the port of the agent transport listener.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-dispatch server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config).map_err(|err| {
        AppError::Config(format!(
            "cannot load config file '{}': {err} — copy config.toml next to the \
             binary or pass --config <path>",
            args.config.display()
        ))
    })?;

    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db_path = config.db_path.to_string_lossy().to_string();
    let db = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    // ── Build the dispatch core ─────────────────────────
    let clock = Arc::new(SystemClock);
    let jobs = JobRepo::new(Arc::clone(&db), clock.clone());
    let agents = AgentRepo::new(Arc::clone(&db), clock.clone());

    let validator = Arc::new(StaticSecretValidator::new(
        config
            .organizations
            .iter()
            .map(|org| (org.system_secret.clone(), org.id.clone())),
    ));
    let registry = Arc::new(TransportRegistry::new(validator));

    let outbound = Arc::new(OutboundProcessor::new(
        Arc::clone(&registry),
        config.dispatch.ack_timeout(),
        config.dispatch.max_retries,
        clock.clone(),
    ));
    let inbound = Arc::new(ReliableInbound::new(
        config.dispatch.seen_retention(),
        clock.clone(),
    ));

    let chat = match &config.slack {
        Some(slack) if !slack.bot_token.is_empty() => {
            let adapter = SlackAdapter::new(slack).map_err(|err| {
                error!(%err, "slack adapter init failed");
                err
            })?;
            info!("slack chat adapter configured");
            ChatService::Configured(Arc::new(adapter))
        }
        _ => {
            info!("no chat integration configured; agent replies will be rejected");
            ChatService::NotConfigured
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        jobs.clone(),
        agents.clone(),
        Arc::clone(&registry),
        Arc::clone(&outbound),
        Arc::clone(&inbound),
        chat,
    ));

    register_hooks(&registry, &dispatcher).await;

    // ── Start background tasks ──────────────────────────
    let infra_ct = CancellationToken::new();
    let reconciler_ct = CancellationToken::new();

    let organizations: Vec<String> = config.organizations.iter().map(|o| o.id.clone()).collect();
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&dispatcher),
        Arc::clone(&registry),
        jobs,
        agents,
        organizations,
        config.dispatch.stale_agent_threshold_minutes,
        config.dispatch.idle_job_threshold_minutes,
    ));
    let reconciler_handle =
        reconciler.spawn(config.dispatch.reconciler_interval(), reconciler_ct.clone());

    let sweeper_handle = spawn_seen_sweeper(
        Arc::clone(&inbound),
        config.dispatch.seen_sweep_interval(),
        infra_ct.clone(),
    );
    let retry_handle = spawn_retry_task(
        Arc::clone(&outbound),
        config.dispatch.retry_interval(),
        infra_ct.clone(),
    );

    let transport_ct = infra_ct.clone();
    let transport_registry = Arc::clone(&registry);
    let transport_port = config.http_port;
    let transport_shutdown_ct = infra_ct.clone();
    let transport_handle = tokio::spawn(async move {
        if let Err(err) = registry::serve(transport_registry, transport_port, transport_ct).await {
            error!(%err, "transport listener failed — initiating shutdown");
            transport_shutdown_ct.cancel();
        }
    });

    info!(port = config.http_port, "dispatch core ready");

    // ── Wait for first shutdown signal ──────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");

    // Spawn a background listener for a second signal (force-exit).
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    // ── Ordered graceful shutdown with timeout ───────────
    let shutdown_fut = async {
        // The reconciler stops first so no new dispatches race teardown.
        reconciler_ct.cancel();
        let _ = reconciler_handle.await;

        // Then the transport and the in-memory maintenance loops.
        infra_ct.cancel();
        let _ = transport_handle.await;
        let _ = retry_handle.await;
        let _ = sweeper_handle.await;
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_fut)
        .await
        .is_err()
    {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    info!("agent-dispatch shut down");
    Ok(())
}

/// Maximum time to wait for graceful shutdown before force-exiting.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Wire the dispatcher into the transport lifecycle hooks.
async fn register_hooks(registry: &Arc<TransportRegistry>, dispatcher: &Arc<Dispatcher>) {
    let open_dispatcher = Arc::clone(dispatcher);
    registry
        .register_open_hook(Arc::new(move |context| {
            let dispatcher = Arc::clone(&open_dispatcher);
            Box::pin(async move {
                if let Err(err) = dispatcher.on_session_open(context).await {
                    error!(%err, "session open handling failed");
                }
            })
        }))
        .await;

    let close_dispatcher = Arc::clone(dispatcher);
    registry
        .register_close_hook(Arc::new(move |context| {
            let dispatcher = Arc::clone(&close_dispatcher);
            Box::pin(async move {
                if let Err(err) = dispatcher.on_session_close(context).await {
                    error!(%err, "session close handling failed");
                }
            })
        }))
        .await;

    let frame_dispatcher = Arc::clone(dispatcher);
    registry
        .register_frame_hook(Arc::new(move |context, frame| {
            let dispatcher = Arc::clone(&frame_dispatcher);
            Box::pin(async move {
                if let Err(err) = dispatcher.on_frame(context, frame).await {
                    error!(%err, "frame handling failed");
                }
            })
        }))
        .await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
