//! The `design` command
//!
//! Acknowledges immediately with a deferred ephemeral response, then runs
//! `gen_design` in the background and edits the original response with the
//! rendered image or the failure message.

use std::sync::Arc;
use std::time::Instant;

use crate::discord::MessageEditor;
use crate::mcp::{
    decode_text_payload, GatePermit, RenderedDesign, ToolCall, ToolClient, ToolResult,
};

use super::{Interaction, InteractionResponse, RouteError};

/// Tool that renders a design from a prompt
pub const DESIGN_TOOL: &str = "gen_design";

pub const BUSY_MESSAGE: &str = "Another design request is being processed, please try again later.";
pub const PROCESSING_MESSAGE: &str = "Processing...";

/// A parsed `design` command
#[derive(Debug, Clone, PartialEq)]
pub struct DesignCommand {
    pub prompt: String,
    pub user_id: String,
    pub application_id: String,
    pub interaction_token: String,
}

impl DesignCommand {
    pub fn from_interaction(interaction: &Interaction) -> Result<Self, RouteError> {
        let prompt = interaction
            .first_option_str()
            .ok_or(RouteError::Missing("prompt option"))?;
        let user_id = interaction.user_id().ok_or(RouteError::Missing("user"))?;

        Ok(Self {
            prompt: prompt.to_string(),
            user_id: user_id.to_string(),
            application_id: interaction.application_id.clone(),
            interaction_token: interaction.token.clone(),
        })
    }
}

/// Runs design commands against the tool client
#[derive(Clone)]
pub struct DesignHandler {
    client: Arc<ToolClient>,
    editor: Arc<dyn MessageEditor>,
}

impl DesignHandler {
    pub fn new(client: Arc<ToolClient>, editor: Arc<dyn MessageEditor>) -> Self {
        Self { client, editor }
    }

    /// Answer the interaction now and finish the work in a background task
    ///
    /// The gate is taken here and handed to the task, so of two commands
    /// arriving together only one is acknowledged.
    pub fn handle(&self, command: DesignCommand) -> InteractionResponse {
        let permit = match self.client.gate().try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::info!(
                    user = %command.user_id,
                    "Design request rejected: tool server busy"
                );
                return InteractionResponse::message(BUSY_MESSAGE);
            }
        };

        let handler = self.clone();
        tokio::spawn(async move { handler.run(command, Some(permit)).await });

        InteractionResponse::deferred_ephemeral(PROCESSING_MESSAGE)
    }

    /// Generate the design and edit the original response with the outcome
    pub async fn process(&self, command: DesignCommand) {
        self.run(command, None).await
    }

    async fn run(&self, command: DesignCommand, permit: Option<GatePermit>) {
        let started = Instant::now();
        tracing::info!(user = %command.user_id, "design command: {}", command.prompt);

        let content = match self.generate(&command.prompt, started, permit).await {
            Ok(design) => {
                tracing::info!("parsed design result: {}", design.rendered_image);
                format!(
                    "Design request processed: {}\n\nResult: {}",
                    command.prompt, design.rendered_image
                )
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), "Error handling design command: {}", e);
                format!("Design request failed: {}", e)
            }
        };

        // A failed edit has nowhere left to be reported.
        if let Err(e) = self
            .editor
            .edit_original(&command.application_id, &command.interaction_token, &content)
            .await
        {
            tracing::error!("Failed to send design follow-up: {}", e);
        }

        tracing::info!(
            user = %command.user_id,
            "Design request finished in {:.1}s",
            started.elapsed().as_secs_f64()
        );
    }

    async fn generate(
        &self,
        prompt: &str,
        started: Instant,
        permit: Option<GatePermit>,
    ) -> ToolResult<RenderedDesign> {
        let call = ToolCall::new(DESIGN_TOOL)
            .arg("prompt", prompt)
            .on_progress(move |event| {
                tracing::info!(
                    "[progress] {} ({:.1}s): {}",
                    DESIGN_TOOL,
                    started.elapsed().as_secs_f64(),
                    event
                );
            });

        let result = match permit {
            Some(permit) => self.client.call_with_permit(permit, call).await?,
            None => self.client.call(call).await?,
        };
        decode_text_payload(DESIGN_TOOL, &result)
    }
}
