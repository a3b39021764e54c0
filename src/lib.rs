#![forbid(unsafe_code)]

//! `agent-dispatch` — control plane brokering chat-platform threads to a
//! fleet of remotely-running coding agents.
//!
//! Chat messages are admitted exactly once per thread, bound to a job, and
//! routed to a single agent over a `WebSocket` frame transport with
//! acknowledgement-driven retry. A periodic reconciler drains queued work,
//! broadcasts liveness checks, and sweeps stale state.

pub mod chat;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod transport;

pub use errors::{AppError, Result};
