//! Chat platform seam.
//!
//! The dispatch core talks to chat through the [`ChatAdapter`] trait and
//! never learns which platform is behind it. [`ChatService`] models the
//! configured/unconfigured states explicitly so an unconfigured call site
//! fails with a dedicated error kind instead of a null check.

pub mod event;
pub mod slack;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::{AppError, Result};

/// Operations the dispatch core requires from a chat platform.
///
/// All operations are idempotent with respect to the cited message key.
pub trait ChatAdapter: Send + Sync {
    /// Post `text` to `channel`, threading under `thread_key` when given.
    /// Returns the platform message key of the posted message.
    fn post_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
        thread_key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>>;

    /// Resolve a platform user id to a display name.
    fn resolve_mention<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Add a named reaction to the cited message.
    fn set_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove a named reaction from the cited message.
    fn remove_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Permanent link to the cited message.
    fn permalink<'a>(&'a self, channel: &'a str, message_key: &'a str)
        -> BoxFuture<'a, Result<String>>;
}

/// Chat integration as seen by the dispatcher: wired in or absent.
#[derive(Clone)]
pub enum ChatService {
    /// A live adapter is available.
    Configured(Arc<dyn ChatAdapter>),
    /// No chat integration configured; every operation fails with
    /// [`AppError::ChatNotConfigured`].
    NotConfigured,
}

impl ChatService {
    fn adapter(&self) -> Result<&Arc<dyn ChatAdapter>> {
        match self {
            Self::Configured(adapter) => Ok(adapter),
            Self::NotConfigured => Err(AppError::ChatNotConfigured),
        }
    }

    /// Whether an adapter is wired in.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    /// Post a message; see [`ChatAdapter::post_message`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatNotConfigured` when no adapter is wired in,
    /// otherwise whatever the adapter returns.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_key: Option<&str>,
    ) -> Result<String> {
        self.adapter()?.post_message(channel, text, thread_key).await
    }

    /// Resolve a mention; see [`ChatAdapter::resolve_mention`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatNotConfigured` when no adapter is wired in.
    pub async fn resolve_mention(&self, user_id: &str) -> Result<String> {
        self.adapter()?.resolve_mention(user_id).await
    }

    /// Add a reaction; see [`ChatAdapter::set_reaction`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatNotConfigured` when no adapter is wired in.
    pub async fn set_reaction(&self, channel: &str, message_key: &str, name: &str) -> Result<()> {
        self.adapter()?.set_reaction(channel, message_key, name).await
    }

    /// Remove a reaction; see [`ChatAdapter::remove_reaction`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatNotConfigured` when no adapter is wired in.
    pub async fn remove_reaction(
        &self,
        channel: &str,
        message_key: &str,
        name: &str,
    ) -> Result<()> {
        self.adapter()?
            .remove_reaction(channel, message_key, name)
            .await
    }

    /// Permalink for a message; see [`ChatAdapter::permalink`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatNotConfigured` when no adapter is wired in.
    pub async fn permalink(&self, channel: &str, message_key: &str) -> Result<String> {
        self.adapter()?.permalink(channel, message_key).await
    }
}
