//! Discord follow-up messages
//!
//! After a deferred acknowledgement the bot edits the original interaction
//! response through the interaction webhook. Challenge games also edit and
//! delete the component messages they leave behind.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Default Discord REST base URL
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Errors that can occur when editing a message
#[derive(Error, Debug)]
pub enum EditError {
    #[error("request to Discord failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Message id that addresses the original interaction response
pub const ORIGINAL_MESSAGE: &str = "@original";

/// Edits and deletes messages through an interaction webhook
#[async_trait]
pub trait MessageEditor: Send + Sync {
    /// Replace the content of a webhook message and clear its components
    async fn edit_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), EditError>;

    async fn delete_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
    ) -> Result<(), EditError>;

    /// Edit the original response of an interaction
    async fn edit_original(
        &self,
        application_id: &str,
        interaction_token: &str,
        content: &str,
    ) -> Result<(), EditError> {
        self.edit_message(application_id, interaction_token, ORIGINAL_MESSAGE, content)
            .await
    }
}

#[derive(Debug, Serialize)]
struct EditPayload<'a> {
    content: &'a str,
    components: &'a [serde_json::Value],
    flags: u64,
}

/// REST client for interaction webhooks
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: Option<String>,
}

impl DiscordClient {
    pub fn new(api_base: impl Into<String>, bot_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    fn message_url(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
    ) -> String {
        format!(
            "{}/webhooks/{}/{}/messages/{}",
            self.api_base, application_id, interaction_token, message_id
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), EditError> {
        let mut request = request.header(
            reqwest::header::USER_AGENT,
            concat!("design-bot/", env!("CARGO_PKG_VERSION")),
        );
        if let Some(token) = &self.bot_token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Bot {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EditError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageEditor for DiscordClient {
    async fn edit_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), EditError> {
        let url = self.message_url(application_id, interaction_token, message_id);
        let payload = EditPayload {
            content,
            components: &[],
            flags: 0,
        };

        self.send(self.http.patch(&url).json(&payload)).await?;
        tracing::debug!("Edited message {} for application {}", message_id, application_id);
        Ok(())
    }

    async fn delete_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
    ) -> Result<(), EditError> {
        let url = self.message_url(application_id, interaction_token, message_id);

        self.send(self.http.delete(&url)).await?;
        tracing::debug!("Deleted message {} for application {}", message_id, application_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_url() {
        let client = DiscordClient::new("https://discord.com/api/v10/", None);
        assert_eq!(
            client.message_url("123", "tok", ORIGINAL_MESSAGE),
            "https://discord.com/api/v10/webhooks/123/tok/messages/@original"
        );
        assert_eq!(
            client.message_url("123", "tok", "987"),
            "https://discord.com/api/v10/webhooks/123/tok/messages/987"
        );
    }

    #[test]
    fn test_edit_payload_clears_components() {
        let payload = EditPayload {
            content: "done",
            components: &[],
            flags: 0,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"content": "done", "components": [], "flags": 0})
        );
    }
}
