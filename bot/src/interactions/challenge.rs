//! Rock-paper-scissors challenges
//!
//! `challenge <object>` opens a game keyed by the interaction id and posts an
//! accept button. Accepting answers with an ephemeral select of objects and
//! deletes the challenge message. Selecting settles the game against the
//! challenger's object, drops it from the store and edits the select away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{json, Value};

use super::{random_emoji, Interaction, InteractionResponse, RouteError};
use crate::discord::MessageEditor;

pub const ACCEPT_PREFIX: &str = "accept_button_";
pub const SELECT_PREFIX: &str = "select_choice_";

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const COMPONENT_STRING_SELECT: u8 = 3;
const BUTTON_STYLE_PRIMARY: u8 = 1;

/// One player's pick
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub user_id: String,
    pub object_name: String,
}

/// An entry in the object select menu
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameOption {
    pub label: String,
    pub value: String,
    pub description: String,
}

/// Decides who wins and what can be picked
pub trait GameRules: Send + Sync {
    /// Outcome message for the challenger's pick against the opponent's
    fn result(&self, challenger: &Choice, opponent: &Choice) -> String;

    /// Objects a player may pick
    fn options(&self) -> Vec<GameOption>;
}

/// Rock crushes scissors, scissors cut paper, paper covers rock
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicRules;

impl ClassicRules {
    const BEATS: [(&'static str, &'static str, &'static str); 3] = [
        ("rock", "scissors", "crushes"),
        ("scissors", "paper", "cut"),
        ("paper", "rock", "covers"),
    ];
}

impl GameRules for ClassicRules {
    fn result(&self, challenger: &Choice, opponent: &Choice) -> String {
        let a = challenger.object_name.to_ascii_lowercase();
        let b = opponent.object_name.to_ascii_lowercase();

        for (winner, loser, verb) in Self::BEATS {
            if a == winner && b == loser {
                return format!(
                    "<@{}>'s **{}** {} <@{}>'s **{}**",
                    challenger.user_id, winner, verb, opponent.user_id, loser
                );
            }
            if b == winner && a == loser {
                return format!(
                    "<@{}>'s **{}** {} <@{}>'s **{}**",
                    opponent.user_id, winner, verb, challenger.user_id, loser
                );
            }
        }

        format!(
            "<@{}> and <@{}> draw with **{}** and **{}**",
            challenger.user_id, opponent.user_id, a, b
        )
    }

    fn options(&self) -> Vec<GameOption> {
        Self::BEATS
            .iter()
            .map(|(object, beats, _)| GameOption {
                label: capitalize(object),
                value: object.to_string(),
                description: format!("Beats {}", beats),
            })
            .collect()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Games waiting for an opponent, keyed by the id of the challenge interaction
#[derive(Debug, Default)]
pub struct ActiveGames {
    games: Mutex<HashMap<String, Choice>>,
}

impl ActiveGames {
    fn games(&self) -> std::sync::MutexGuard<'_, HashMap<String, Choice>> {
        self.games.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, game_id: impl Into<String>, challenger: Choice) {
        self.games().insert(game_id.into(), challenger);
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.games().contains_key(game_id)
    }

    /// Remove a game, returning the challenger's pick
    pub fn take(&self, game_id: &str) -> Option<Choice> {
        self.games().remove(game_id)
    }

    pub fn len(&self) -> usize {
        self.games().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs the challenge command and its component interactions
#[derive(Clone)]
pub struct ChallengeHandler {
    games: Arc<ActiveGames>,
    rules: Arc<dyn GameRules>,
    editor: Arc<dyn MessageEditor>,
}

impl ChallengeHandler {
    pub fn new(rules: Arc<dyn GameRules>, editor: Arc<dyn MessageEditor>) -> Self {
        Self {
            games: Arc::new(ActiveGames::default()),
            rules,
            editor,
        }
    }

    pub fn games(&self) -> &ActiveGames {
        &self.games
    }

    /// Open a game for the invoking user and post the accept button
    pub fn start(&self, interaction: &Interaction) -> Result<InteractionResponse, RouteError> {
        let user_id = interaction.user_id().ok_or(RouteError::Missing("user"))?;
        let object_name = interaction
            .first_option_str()
            .ok_or(RouteError::Missing("object option"))?;
        if interaction.id.is_empty() {
            return Err(RouteError::Missing("interaction id"));
        }

        self.games.insert(
            interaction.id.clone(),
            Choice {
                user_id: user_id.to_string(),
                object_name: object_name.to_string(),
            },
        );
        tracing::info!(game = %interaction.id, user = %user_id, "Challenge started");

        let button = json!({
            "type": COMPONENT_BUTTON,
            "custom_id": format!("{}{}", ACCEPT_PREFIX, interaction.id),
            "label": "Accept",
            "style": BUTTON_STYLE_PRIMARY,
        });

        Ok(InteractionResponse::message(format!(
            "Rock papers scissors challenge from <@{}>",
            user_id
        ))
        .with_components(vec![action_row(button)]))
    }

    /// Handle a click on an accept button or a pick from the object select
    pub fn handle_component(
        &self,
        interaction: &Interaction,
    ) -> Result<InteractionResponse, RouteError> {
        let custom_id = interaction
            .data
            .as_ref()
            .and_then(|d| d.custom_id.as_deref())
            .ok_or(RouteError::Missing("custom id"))?;

        if let Some(game_id) = custom_id.strip_prefix(ACCEPT_PREFIX) {
            self.accept(interaction, game_id)
        } else if let Some(game_id) = custom_id.strip_prefix(SELECT_PREFIX) {
            self.select(interaction, game_id)
        } else {
            tracing::error!("unknown component: {}", custom_id);
            Err(RouteError::UnknownComponent(custom_id.to_string()))
        }
    }

    fn accept(
        &self,
        interaction: &Interaction,
        game_id: &str,
    ) -> Result<InteractionResponse, RouteError> {
        if !self.games.contains(game_id) {
            tracing::warn!(game = %game_id, "Accept for a game that is not active");
            return Err(RouteError::UnknownGame(game_id.to_string()));
        }

        let mut options = self.rules.options();
        options.shuffle(&mut rand::rng());

        if let Some(message_id) = interaction.message_id() {
            let editor = self.editor.clone();
            let application_id = interaction.application_id.clone();
            let token = interaction.token.clone();
            let message_id = message_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = editor
                    .delete_message(&application_id, &token, &message_id)
                    .await
                {
                    tracing::error!("Failed to delete challenge message: {}", e);
                }
            });
        }

        let select = json!({
            "type": COMPONENT_STRING_SELECT,
            "custom_id": format!("{}{}", SELECT_PREFIX, game_id),
            "options": options,
        });

        Ok(InteractionResponse::ephemeral_message("What is your object of choice?")
            .with_components(vec![action_row(select)]))
    }

    fn select(
        &self,
        interaction: &Interaction,
        game_id: &str,
    ) -> Result<InteractionResponse, RouteError> {
        let object_name = interaction
            .data
            .as_ref()
            .and_then(|d| d.values.first())
            .ok_or(RouteError::Missing("selected value"))?;
        let user_id = interaction.user_id().ok_or(RouteError::Missing("user"))?;

        let challenger = self.games.take(game_id).ok_or_else(|| {
            tracing::warn!(game = %game_id, "Pick for a game that is not active");
            RouteError::UnknownGame(game_id.to_string())
        })?;
        let opponent = Choice {
            user_id: user_id.to_string(),
            object_name: object_name.clone(),
        };
        let result = self.rules.result(&challenger, &opponent);
        tracing::info!(game = %game_id, "Challenge settled: {}", result);

        if let Some(message_id) = interaction.message_id() {
            let editor = self.editor.clone();
            let application_id = interaction.application_id.clone();
            let token = interaction.token.clone();
            let message_id = message_id.to_string();
            let content = format!("Nice choice {}", random_emoji());
            tokio::spawn(async move {
                if let Err(e) = editor
                    .edit_message(&application_id, &token, &message_id, &content)
                    .await
                {
                    tracing::error!("Failed to update challenge select: {}", e);
                }
            });
        }

        Ok(InteractionResponse::message(result))
    }
}

fn action_row(component: Value) -> Value {
    json!({
        "type": COMPONENT_ACTION_ROW,
        "components": [component],
    })
}
