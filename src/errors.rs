//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Transport listener or frame-exchange failure.
    Transport(String),
    /// Target transport session is not in the registry.
    SessionGone(String),
    /// Bearer credential rejected on session open.
    Unauthenticated(String),
    /// Chat platform API failure.
    Chat(String),
    /// Chat operation attempted while no chat adapter is configured.
    ChatNotConfigured,
    /// Requested entity does not exist.
    NotFound(String),
    /// Inbound message or record has already been admitted.
    Duplicate(String),
    /// Illegal status transition.
    InvalidTransition(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::SessionGone(id) => write!(f, "session gone: {id}"),
            Self::Unauthenticated(msg) => write!(f, "unauthenticated: {msg}"),
            Self::Chat(msg) => write!(f, "chat: {msg}"),
            Self::ChatNotConfigured => f.write_str("chat integration is not configured"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Duplicate(msg) => write!(f, "duplicate: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
