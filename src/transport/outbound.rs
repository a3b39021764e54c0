//! Reliable outbound processing: ack-tracked dispatch with bounded retry.
//!
//! Dispatched frames are recorded in a pending table keyed by frame id,
//! then handed to the recipient session's writer queue. A timer-driven
//! scan re-sends entries that outlive the ack timeout and drops entries
//! that exhaust their retries. Disconnects drop all pending entries for
//! the session.

use std::collections::HashMap;
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
use crate::{AppError, Result};

/// One outbound frame awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingOutbound {
    /// Frame id the ack must cite.
    pub id: String,
    /// Session the frame was dispatched to.
    pub recipient_session_id: String,
    /// The frame itself, re-sent verbatim on retry.
    pub frame: Frame,
    /// When the frame was first handed to the writer.
    pub first_sent_at: DateTime<Utc>,
    /// When the frame was most recently handed to the writer.
    pub last_sent_at: DateTime<Utc>,
    /// Retries issued so far.
    pub retries: u32,
}

/// Ack-tracked outbound dispatch with bounded retry.
pub struct OutboundProcessor {
    pending: RwLock<HashMap<String, PendingOutbound>>,
    registry: Arc<TransportRegistry>,
    ack_timeout: chrono::Duration,
    max_retries: u32,
    clock: Arc<dyn Clock>,
}

impl OutboundProcessor {
    /// Create a processor sending through `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<TransportRegistry>,
        ack_timeout: Duration,
        max_retries: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            registry,
            ack_timeout: chrono::Duration::from_std(ack_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            max_retries,
            clock,
        }
    }

    /// Record a frame as pending and submit it to the session's writer.
    ///
    /// The pending-table lock is released before the frame is handed to
    /// the writer task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the frame has no id and
    /// `AppError::SessionGone` if the session is not registered; in the
    /// latter case the pending entry is removed again.
    pub async fn dispatch(&self, session_id: &str, frame: Frame) -> Result<()> {
        let frame_id = frame
            .id
            .clone()
            .ok_or_else(|| AppError::Transport("outbound frame requires an id".into()))?;

        let now = self.clock.now();
        {
            let mut pending = self.pending.write().await;
            pending.insert(
                frame_id.clone(),
                PendingOutbound {
                    id: frame_id.clone(),
                    recipient_session_id: session_id.to_owned(),
                    frame: frame.clone(),
                    first_sent_at: now,
                    last_sent_at: now,
                    retries: 0,
                },
            );
        }

        if let Err(err) = self.registry.send(session_id, &frame).await {
            self.pending.write().await.remove(&frame_id);
            return Err(err);
        }

        debug!(session_id, frame_id, frame_type = %frame.frame_type, "frame dispatched");
        Ok(())
    }

    /// Delete the pending entry an ack cites. Repeated acks are no-ops.
    ///
    /// Returns whether an entry was pending for the id.
    pub async fn handle_ack(&self, message_id: &str) -> bool {
        let removed = self.pending.write().await.remove(message_id);
        match removed {
            Some(entry) => {
                debug!(
                    frame_id = message_id,
                    session_id = %entry.recipient_session_id,
                    "outbound frame acked"
                );
                true
            }
            None => false,
        }
    }

    /// Drop all pending entries for a closed session.
    ///
    /// Returns the number of entries dropped.
    pub async fn drop_session(&self, session_id: &str) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.recipient_session_id != session_id);
        let dropped = before - pending.len();
        if dropped > 0 {
            info!(session_id, dropped, "dropped pending frames for closed session");
        }
        dropped
    }

    /// Whether a frame id is currently pending.
    pub async fn is_pending(&self, frame_id: &str) -> bool {
        self.pending.read().await.contains_key(frame_id)
    }

    /// Snapshot of one pending entry, if present.
    pub async fn pending_entry(&self, frame_id: &str) -> Option<PendingOutbound> {
        self.pending.read().await.get(frame_id).cloned()
    }

    /// Number of frames currently pending.
    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Run one retry scan over the pending table.
    ///
    /// Entries older than the ack timeout are re-sent with a refreshed
    /// timestamp; entries that already used all retries are dropped with a
    /// log. Sends happen after the table lock is released; a send to a
    /// vanished session drops its entries.
    pub async fn run_retry_scan(&self) {
        let now = self.clock.now();
        let mut to_send: Vec<(String, Frame)> = Vec::new();

        {
            let mut pending = self.pending.write().await;
            let mut exhausted: Vec<String> = Vec::new();

            for (id, entry) in pending.iter_mut() {
                if now - entry.last_sent_at < self.ack_timeout {
                    continue;
                }
                if entry.retries >= self.max_retries {
                    exhausted.push(id.clone());
                    continue;
                }
                entry.retries += 1;
                entry.last_sent_at = now;
                to_send.push((entry.recipient_session_id.clone(), entry.frame.clone()));
            }

            for id in exhausted {
                if let Some(entry) = pending.remove(&id) {
                    warn!(
                        frame_id = %id,
                        session_id = %entry.recipient_session_id,
                        retries = entry.retries,
                        "outbound frame dropped after max retries"
                    );
                }
            }
        }

        for (session_id, frame) in to_send {
            let frame_id = frame.id.clone().unwrap_or_default();
            debug!(session_id, frame_id, "re-sending unacked frame");
            if let Err(err) = self.registry.send(&session_id, &frame).await {
                debug!(session_id, frame_id, %err, "retry target gone; dropping its pending frames");
                self.drop_session(&session_id).await;
            }
        }
    }
}

/// Spawn the timer-driven retry scan.
#[must_use]
pub fn spawn_retry_task(
    outbound: Arc<OutboundProcessor>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("outbound retry task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    outbound.run_retry_scan().await;
                }
            }
        }
    })
}
