//! Slack implementation of the chat adapter.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use slack_morphism::prelude::{
    SlackApiChatGetPermalinkRequest, SlackApiChatPostMessageRequest, SlackApiReactionsAddRequest,
    SlackApiReactionsRemoveRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackApiUsersInfoRequest, SlackChannelId, SlackClient, SlackClientHyperHttpsConnector,
    SlackMessageContent, SlackReactionName, SlackTs, SlackUserId,
};
use tokio::time::timeout;

use crate::config::SlackConfig;
use crate::{AppError, Result};

use super::ChatAdapter;

/// Deadline applied to every Slack API call.
const CALL_DEADLINE: Duration = Duration::from_secs(30);

/// Chat adapter backed by the Slack Web API.
pub struct SlackAdapter {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    token: SlackApiToken,
}

impl SlackAdapter {
    /// Build an adapter from the Slack configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Chat` if the HTTPS connector cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Chat(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        Ok(Self { client, token })
    }
}

/// Await a Slack call under [`CALL_DEADLINE`], flattening timeout and API
/// failures into `AppError::Chat`.
async fn deadline<T, E, F>(operation: &str, fut: F) -> Result<T>
where
    E: std::fmt::Display,
    F: std::future::Future<Output = std::result::Result<T, E>>,
{
    match timeout(CALL_DEADLINE, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::Chat(format!("{operation} failed: {err}"))),
        Err(_) => Err(AppError::Chat(format!("{operation} timed out"))),
    }
}

impl ChatAdapter for SlackAdapter {
    fn post_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
        thread_key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let session = self.client.open_session(&self.token);
            let content = SlackMessageContent {
                text: Some(text.to_owned()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            };
            let request = SlackApiChatPostMessageRequest {
                channel: SlackChannelId(channel.to_owned()),
                content,
                as_user: None,
                icon_emoji: None,
                icon_url: None,
                link_names: Some(true),
                parse: None,
                thread_ts: thread_key.map(|ts| SlackTs(ts.to_owned())),
                username: None,
                reply_broadcast: None,
                unfurl_links: None,
                unfurl_media: None,
            };

            let response = deadline("chat.postMessage", session.chat_post_message(&request)).await?;
            Ok(response.ts.0)
        })
    }

    fn resolve_mention<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let session = self.client.open_session(&self.token);
            let request = SlackApiUsersInfoRequest::new(SlackUserId(user_id.to_owned()));

            let response = deadline("users.info", session.users_info(&request)).await?;
            let user = response.user;
            let display = user
                .profile
                .and_then(|profile| {
                    profile
                        .display_name
                        .filter(|name| !name.is_empty())
                        .or(profile.real_name)
                })
                .or(user.name)
                .unwrap_or_else(|| user_id.to_owned());
            Ok(display)
        })
    }

    fn set_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let session = self.client.open_session(&self.token);
            let request = SlackApiReactionsAddRequest::new(
                SlackChannelId(channel.to_owned()),
                SlackReactionName(name.to_owned()),
                SlackTs(message_key.to_owned()),
            );

            // "already_reacted" means the reaction is in place; the
            // operation is idempotent with respect to the message key.
            match deadline("reactions.add", session.reactions_add(&request)).await {
                Ok(_) => Ok(()),
                Err(AppError::Chat(msg)) if msg.contains("already_reacted") => Ok(()),
                Err(err) => Err(err),
            }
        })
    }

    fn remove_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let session = self.client.open_session(&self.token);
            let mut request =
                SlackApiReactionsRemoveRequest::new(SlackReactionName(name.to_owned()));
            request.channel = Some(SlackChannelId(channel.to_owned()));
            request.timestamp = Some(SlackTs(message_key.to_owned()));

            match deadline("reactions.remove", session.reactions_remove(&request)).await {
                Ok(_) => Ok(()),
                Err(AppError::Chat(msg)) if msg.contains("no_reaction") => Ok(()),
                Err(err) => Err(err),
            }
        })
    }

    fn permalink<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let session = self.client.open_session(&self.token);
            let request = SlackApiChatGetPermalinkRequest::new(
                SlackChannelId(channel.to_owned()),
                SlackTs(message_key.to_owned()),
            );

            let response =
                deadline("chat.getPermalink", session.chat_get_permalink(&request)).await?;
            Ok(response.permalink.to_string())
        })
    }
}
