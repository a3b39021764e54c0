//! `WebSocket` transport registry for connected agent sessions.
//!
//! Agents connect to `GET /transport` with a bearer credential resolved to
//! an organization by an injected [`CredentialValidator`]. Each accepted
//! session gets one reader task and one writer task; the writer consumes a
//! per-session queue, which is what serializes sends to a single session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::frame::Frame;
use crate::{AppError, Result};

/// Write deadline applied to every outbound `WebSocket` send.
const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Resolves a bearer credential to an organization id.
pub trait CredentialValidator: Send + Sync {
    /// Resolve `credential` to the owning organization.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthenticated` when the credential is rejected.
    fn validate(&self, credential: &str) -> Result<String>;
}

/// Validator backed by a static secret→organization table, typically built
/// from the `[[organizations]]` config section.
pub struct StaticSecretValidator {
    secrets: HashMap<String, String>,
}

impl StaticSecretValidator {
    /// Build a validator from `(system_secret, organization_id)` pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            secrets: pairs.into_iter().collect(),
        }
    }
}

impl CredentialValidator for StaticSecretValidator {
    fn validate(&self, credential: &str) -> Result<String> {
        self.secrets
            .get(credential)
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("unknown system secret".into()))
    }
}

/// Identity attached to one connected agent session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Registry-assigned transport session id.
    pub session_id: String,
    /// Organization the credential resolved to.
    pub organization_id: String,
    /// Stable agent identity presented at connect time.
    pub agent_instance_id: String,
    /// Repository affinity hint presented at connect time.
    pub repo_url: Option<String>,
}

/// Hook invoked when a session opens.
pub type OpenHook = Arc<dyn Fn(SessionContext) -> BoxFuture<'static, ()> + Send + Sync>;
/// Hook invoked exactly once when a session closes.
pub type CloseHook = Arc<dyn Fn(SessionContext) -> BoxFuture<'static, ()> + Send + Sync>;
/// Hook invoked for every parseable inbound frame.
pub type FrameHook = Arc<dyn Fn(SessionContext, Frame) -> BoxFuture<'static, ()> + Send + Sync>;

struct SessionHandle {
    context: SessionContext,
    outbound_tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Hooks {
    open: Vec<OpenHook>,
    close: Vec<CloseHook>,
    frame: Vec<FrameHook>,
}

/// Live registry of connected agent sessions.
pub struct TransportRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    hooks: RwLock<Hooks>,
    validator: Arc<dyn CredentialValidator>,
}

/// Query parameters an agent presents on the upgrade request.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    agent_instance_id: String,
    #[serde(default)]
    repo_url: Option<String>,
}

impl TransportRegistry {
    /// Create an empty registry with the given credential validator.
    #[must_use]
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Hooks::default()),
            validator,
        }
    }

    /// Register a callback for session open. Call before serving.
    pub async fn register_open_hook(&self, hook: OpenHook) {
        self.hooks.write().await.open.push(hook);
    }

    /// Register a callback for session close. Fires exactly once per
    /// session. Call before serving.
    pub async fn register_close_hook(&self, hook: CloseHook) {
        self.hooks.write().await.close.push(hook);
    }

    /// Register a callback for inbound frames. Call before serving.
    pub async fn register_frame_hook(&self, hook: FrameHook) {
        self.hooks.write().await.frame.push(hook);
    }

    /// Send one frame to one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionGone` if the session is not registered or
    /// its writer has shut down, `AppError::Transport` if the frame fails
    /// to encode.
    pub async fn send(&self, session_id: &str, frame: &Frame) -> Result<()> {
        let text = frame.encode()?;
        let tx = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .map(|handle| handle.outbound_tx.clone())
        };
        let tx = tx.ok_or_else(|| AppError::SessionGone(session_id.to_owned()))?;
        tx.send(text)
            .map_err(|_| AppError::SessionGone(session_id.to_owned()))
    }

    /// Send one frame to every session matching the predicate.
    ///
    /// Delivery order across sessions is unspecified. Returns the number
    /// of sessions the frame was queued for.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the frame fails to encode.
    pub async fn broadcast<P>(&self, predicate: P, frame: &Frame) -> Result<usize>
    where
        P: Fn(&SessionContext) -> bool,
    {
        let text = frame.encode()?;
        let targets: Vec<mpsc::UnboundedSender<String>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|handle| predicate(&handle.context))
                .map(|handle| handle.outbound_tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(text.clone()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Ids of all currently registered sessions.
    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Context of one registered session, if present.
    pub async fn session_context(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.context.clone())
    }

    /// Register a session directly, bypassing the `WebSocket` listener.
    ///
    /// Frames sent to the session are delivered to the returned receiver
    /// as wire text. Intended for in-process harnesses; the production
    /// path registers sessions through [`serve`].
    pub async fn attach_session(
        &self,
        context: SessionContext,
    ) -> mpsc::UnboundedReceiver<String> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            context: context.clone(),
            outbound_tx,
        };
        self.sessions
            .write()
            .await
            .insert(context.session_id.clone(), handle);
        outbound_rx
    }

    /// Remove a session and fire close hooks if it was present.
    pub async fn detach_session(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(handle) = removed {
            self.run_close_hooks(handle.context).await;
        }
    }

    /// Deliver one inbound frame as if it arrived on the session's socket.
    ///
    /// Runs the registered frame hooks in order. Intended for in-process
    /// harnesses.
    pub async fn inject_frame(&self, session_id: &str, frame: Frame) {
        let context = self.session_context(session_id).await;
        if let Some(context) = context {
            self.run_frame_hooks(context, frame).await;
        }
    }

    async fn run_open_hooks(&self, context: SessionContext) {
        let hooks: Vec<OpenHook> = self.hooks.read().await.open.clone();
        for hook in hooks {
            hook(context.clone()).await;
        }
    }

    async fn run_close_hooks(&self, context: SessionContext) {
        let hooks: Vec<CloseHook> = self.hooks.read().await.close.clone();
        for hook in hooks {
            hook(context.clone()).await;
        }
    }

    async fn run_frame_hooks(&self, context: SessionContext, frame: Frame) {
        let hooks: Vec<FrameHook> = self.hooks.read().await.frame.clone();
        for hook in hooks {
            hook(context.clone(), frame.clone()).await;
        }
    }

    /// Drive one accepted `WebSocket` until it closes.
    async fn run_session(self: Arc<Self>, socket: WebSocket, context: SessionContext) {
        let session_id = context.session_id.clone();
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                session_id.clone(),
                SessionHandle {
                    context: context.clone(),
                    outbound_tx,
                },
            );
        }

        info!(
            session_id,
            organization_id = %context.organization_id,
            agent_instance_id = %context.agent_instance_id,
            "agent session opened"
        );
        self.run_open_hooks(context.clone()).await;

        // Writer: drains the per-session queue. Exits when the handle is
        // removed from the registry (sender dropped) or a send fails.
        let writer_session = session_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                match tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(text.into())))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(session_id = %writer_session, %err, "websocket send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(session_id = %writer_session, "write deadline exceeded; closing");
                        break;
                    }
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader: one task per session, so inbound handling for a single
        // session is serialized.
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                    Ok(frame) => self.run_frame_hooks(context.clone(), frame).await,
                    Err(err) => {
                        warn!(session_id, %err, "skipping unparseable frame");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(session_id, %err, "websocket read failed");
                    break;
                }
            }
        }

        // Removing the handle drops the queue sender; the writer drains
        // whatever is left and exits. Bound the wait in case the socket
        // has stopped accepting writes.
        self.detach_session(&session_id).await;
        if tokio::time::timeout(WRITE_DEADLINE, writer).await.is_err() {
            warn!(session_id, "writer did not drain before the deadline");
        }
        info!(session_id, "agent session closed");
    }
}

/// Extract the bearer token from an Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

async fn transport_handler(
    State(registry): State<Arc<TransportRegistry>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(credential) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer credential").into_response();
    };

    let organization_id = match registry.validator.validate(credential) {
        Ok(org) => org,
        Err(err) => {
            warn!(%err, "agent session rejected");
            return (StatusCode::UNAUTHORIZED, "credential rejected").into_response();
        }
    };

    let context = SessionContext {
        session_id: Uuid::new_v4().to_string(),
        organization_id,
        agent_instance_id: params.agent_instance_id,
        repo_url: params.repo_url,
    };

    ws.on_upgrade(move |socket| registry.run_session(socket, context))
}

/// Start the agent transport listener on `port`.
///
/// Open sessions are closed when `ct` is cancelled; their close hooks fire
/// as the readers observe the shutdown.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener fails to bind or serve.
pub async fn serve(
    registry: Arc<TransportRegistry>,
    port: u16,
    ct: CancellationToken,
) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let router = Router::new()
        .route("/transport", get(transport_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind transport on {bind}: {err}")))?;

    info!(%bind, "starting agent transport listener");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Transport(format!("transport server error: {err}")))?;

    info!("agent transport listener shut down");
    Ok(())
}
