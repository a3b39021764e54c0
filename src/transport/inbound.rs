//! Reliable inbound handling: duplicate suppression and ack emission.
//!
//! Every inbound frame carrying an id gets exactly one ack, whether or not
//! it was seen before. The id is recorded only after downstream handling
//! succeeds, so an agent's retransmit of a failed frame is reprocessed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::transport::frame::Frame;
use crate::transport::registry::TransportRegistry;
use crate::Result;

/// One acked inbound frame retained for duplicate suppression.
#[derive(Debug, Clone)]
struct SeenInbound {
    session_id: String,
    acked_at: DateTime<Utc>,
}

/// Bounded in-memory table of recently seen inbound frame ids.
pub struct ReliableInbound {
    seen: RwLock<HashMap<String, SeenInbound>>,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ReliableInbound {
    /// Create a handler retaining seen ids for `retention`.
    #[must_use]
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: RwLock::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
            clock,
        }
    }

    /// Run one inbound frame through duplicate suppression, downstream
    /// handling, and ack emission.
    ///
    /// Frames without an id bypass the handler entirely. For id-bearing
    /// frames: a duplicate inside the retention window is acked without
    /// invoking `downstream`; a fresh frame is handed to `downstream`,
    /// recorded only on success, and acked either way.
    ///
    /// # Errors
    ///
    /// Propagates the downstream error. Ack delivery failures are logged,
    /// not propagated.
    pub async fn process<F, Fut>(
        &self,
        registry: &TransportRegistry,
        session_id: &str,
        frame: Frame,
        downstream: F,
    ) -> Result<()>
    where
        F: FnOnce(Frame) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(frame_id) = frame.id.clone() else {
            return downstream(frame).await;
        };

        if self.is_seen(&frame_id).await {
            debug!(session_id, frame_id, "duplicate inbound frame suppressed");
            self.emit_ack(registry, session_id, &frame_id).await;
            return Ok(());
        }

        let result = downstream(frame).await;
        if result.is_ok() {
            self.mark_seen(&frame_id, session_id).await;
        }
        self.emit_ack(registry, session_id, &frame_id).await;
        result
    }

    async fn emit_ack(&self, registry: &TransportRegistry, session_id: &str, frame_id: &str) {
        if let Err(err) = registry.send(session_id, &Frame::ack(frame_id)).await {
            warn!(session_id, frame_id, %err, "failed to deliver ack");
        }
    }

    /// Whether a frame id was recorded inside the retention window.
    pub async fn is_seen(&self, frame_id: &str) -> bool {
        let now = self.clock.now();
        let seen = self.seen.read().await;
        seen.get(frame_id)
            .is_some_and(|entry| now - entry.acked_at < self.retention)
    }

    async fn mark_seen(&self, frame_id: &str, session_id: &str) {
        let entry = SeenInbound {
            session_id: session_id.to_owned(),
            acked_at: self.clock.now(),
        };
        self.seen.write().await.insert(frame_id.to_owned(), entry);
    }

    /// Evict entries older than the retention window. Returns the number
    /// of evicted ids.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, entry| now - entry.acked_at < self.retention);
        let evicted = before - seen.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired seen-inbound ids");
        }
        evicted
    }

    /// The session a seen id was received on, if still retained.
    pub async fn seen_session(&self, frame_id: &str) -> Option<String> {
        self.seen
            .read()
            .await
            .get(frame_id)
            .map(|entry| entry.session_id.clone())
    }
}

/// Spawn the background eviction sweep for the seen-id table.
#[must_use]
pub fn spawn_seen_sweeper(
    inbound: Arc<ReliableInbound>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("seen-inbound sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    inbound.sweep().await;
                }
            }
        }
    })
}
