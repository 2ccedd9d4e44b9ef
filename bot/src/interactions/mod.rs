//! Interaction routing
//!
//! Interactions arrive already verified and parsed from the webhook gateway.
//! This module decides what to answer immediately; long-running work is
//! finished later through a follow-up edit.

pub mod challenge;
pub mod design;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use challenge::{ActiveGames, ChallengeHandler, Choice, ClassicRules, GameOption, GameRules};
pub use design::{DesignCommand, DesignHandler};

// Interaction types
pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;
pub const INTERACTION_MESSAGE_COMPONENT: u8 = 3;

// Response types
pub const RESPONSE_PONG: u8 = 1;
pub const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
pub const RESPONSE_DEFERRED_CHANNEL_MESSAGE: u8 = 5;

/// Message flag: only the invoking user sees the message
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

#[derive(Error, Debug, PartialEq)]
pub enum RouteError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown interaction type: {0}")]
    UnknownInteractionType(u8),

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("no active game with id {0}")]
    UnknownGame(String),

    #[error("interaction is missing {0}")]
    Missing(&'static str),
}

/// An inbound interaction
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub data: Option<InteractionData>,
    /// Present for guild interactions
    #[serde(default)]
    pub member: Option<Member>,
    /// Present for DM interactions
    #[serde(default)]
    pub user: Option<User>,
    /// Message a component interaction was triggered from
    #[serde(default)]
    pub message: Option<MessageRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub custom_id: Option<String>,
    /// Picked values of a select menu
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

impl Interaction {
    /// Id of the invoking user, whether in a guild or a DM
    pub fn user_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .map(|m| m.user.id.as_str())
            .or_else(|| self.user.as_ref().map(|u| u.id.as_str()))
    }

    /// First option value as a string
    pub fn first_option_str(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.options.first())
            .and_then(|o| o.value.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.as_ref().map(|m| m.id.as_str())
    }
}

const EMOJIS: &[&str] = &[
    "😭", "😄", "😌", "🤓", "😎", "😤", "🤖", "😶‍🌫️", "🌏", "📸", "💿", "👋", "🌊", "✨",
];

pub fn random_emoji() -> &'static str {
    EMOJIS.choose(&mut rand::rng()).copied().unwrap_or("✨")
}

/// Immediate response to an interaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseData {
    pub content: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub flags: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Value>,
}

fn is_zero(flags: &u64) -> bool {
    *flags == 0
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    /// Visible channel message
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content: content.into(),
                flags: 0,
                components: Vec::new(),
            }),
        }
    }

    /// "Thinking" acknowledgement only the invoking user sees
    pub fn deferred_ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_DEFERRED_CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content: content.into(),
                flags: FLAG_EPHEMERAL,
                components: Vec::new(),
            }),
        }
    }

    /// Channel message only the invoking user sees
    pub fn ephemeral_message(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content: content.into(),
                flags: FLAG_EPHEMERAL,
                components: Vec::new(),
            }),
        }
    }

    /// Attach message components (action rows)
    pub fn with_components(mut self, components: Vec<Value>) -> Self {
        if let Some(data) = self.data.as_mut() {
            data.components = components;
        }
        self
    }

    pub fn content(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.content.as_str())
    }
}

/// Routes interactions to feature handlers
pub struct InteractionRouter {
    design: DesignHandler,
    challenge: ChallengeHandler,
}

impl InteractionRouter {
    pub fn new(design: DesignHandler, challenge: ChallengeHandler) -> Self {
        Self { design, challenge }
    }

    pub fn route(&self, interaction: &Interaction) -> Result<InteractionResponse, RouteError> {
        match interaction.kind {
            INTERACTION_PING => Ok(InteractionResponse::pong()),
            INTERACTION_APPLICATION_COMMAND => {
                let name = interaction
                    .data
                    .as_ref()
                    .and_then(|d| d.name.as_deref())
                    .ok_or(RouteError::Missing("command name"))?;

                match name {
                    "test" => Ok(InteractionResponse::message(format!(
                        "hello world {}",
                        random_emoji()
                    ))),
                    "challenge" => self.challenge.start(interaction),
                    "design" => {
                        let command = DesignCommand::from_interaction(interaction)?;
                        Ok(self.design.handle(command))
                    }
                    other => {
                        tracing::error!("unknown command: {}", other);
                        Err(RouteError::UnknownCommand(other.to_string()))
                    }
                }
            }
            INTERACTION_MESSAGE_COMPONENT => self.challenge.handle_component(interaction),
            other => {
                tracing::error!("unknown interaction type: {}", other);
                Err(RouteError::UnknownInteractionType(other))
            }
        }
    }
}
