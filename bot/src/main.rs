use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use design_bot::config::ClientConfig;
use design_bot::discord::{DiscordClient, EditError, MessageEditor, DEFAULT_API_BASE};
use design_bot::interactions::{DesignCommand, DesignHandler};
use design_bot::mcp::{JsonObject, ToolCall, ToolClient};

#[derive(Parser)]
#[command(name = "design-bot")]
#[command(about = "Drive the design MCP tool server from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Discord REST base URL
    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE)]
    discord_api_base: String,

    /// Bot token sent with follow-up edits
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    discord_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools advertised by the server
    Tools,
    /// Call a tool directly
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, short)]
        args: Option<String>,
        /// Call timeout in seconds (defaults to MCP_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run the design command
    ///
    /// With an interaction token the follow-up edits that interaction's
    /// original response; otherwise it is printed.
    Design {
        /// Design prompt
        prompt: String,
        /// Application that received the interaction
        #[arg(long, requires = "interaction_token")]
        application_id: Option<String>,
        /// Token of the interaction to edit
        #[arg(long, requires = "application_id")]
        interaction_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = ClientConfig::load().context("Failed to load configuration")?;
    tracing::debug!(transport = config.transport.kind(), "Loaded client configuration");
    let client = Arc::new(ToolClient::new(config));

    match cli.command {
        Commands::Tools => run_tools(&client).await?,
        Commands::Call {
            tool,
            args,
            timeout,
        } => run_call_tool(&client, &tool, args, timeout).await?,
        Commands::Design {
            prompt,
            application_id,
            interaction_token,
        } => {
            let (editor, application_id, interaction_token): (Arc<dyn MessageEditor>, _, _) =
                match (application_id, interaction_token) {
                    (Some(app), Some(token)) => (
                        Arc::new(DiscordClient::new(cli.discord_api_base, cli.discord_token)),
                        app,
                        token,
                    ),
                    _ => (Arc::new(StdoutEditor), "cli".to_string(), "cli".to_string()),
                };
            let command = DesignCommand {
                prompt,
                user_id: "cli".to_string(),
                application_id,
                interaction_token,
            };
            DesignHandler::new(client, editor).process(command).await;
        }
    }

    Ok(())
}

/// Logs go to stderr; `LOG_FORMAT=json` has the same effect as `--log-json`
fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let use_json = json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

async fn run_tools(client: &ToolClient) -> Result<()> {
    client.connect().await?;
    let tools = client.tools();
    client.disconnect().await;

    if tools.is_empty() {
        println!("No tools found.");
        return Ok(());
    }

    println!("=== {} tools ===", tools.len());
    for tool in tools {
        let desc = tool
            .description
            .as_deref()
            .unwrap_or("No description")
            .lines()
            .next()
            .unwrap_or("");
        println!("  {} - {}", tool.name, desc);
    }

    Ok(())
}

async fn run_call_tool(
    client: &ToolClient,
    tool_name: &str,
    args: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let arguments: JsonObject = match args {
        Some(json) => serde_json::from_str(&json).context("--args must be a JSON object")?,
        None => JsonObject::new(),
    };

    println!("Calling tool: {}", tool_name);
    if !arguments.is_empty() {
        println!("Arguments: {}", serde_json::to_string_pretty(&arguments)?);
    }
    println!();

    let mut call = ToolCall::new(tool_name)
        .arguments(arguments)
        .on_progress(|event| eprintln!("[progress] {}", event));
    if let Some(secs) = timeout {
        call = call.timeout(Duration::from_secs(secs));
    }

    let result = client.call(call).await?;

    println!("Result:");
    for content in &result.content {
        match &content.raw {
            rmcp::model::RawContent::Text(text) => {
                println!("{}", text.text);
            }
            _ => {
                println!("{:?}", content);
            }
        }
    }

    Ok(())
}

/// Prints follow-up edits instead of sending them to Discord
struct StdoutEditor;

#[async_trait]
impl MessageEditor for StdoutEditor {
    async fn edit_message(
        &self,
        _application_id: &str,
        _interaction_token: &str,
        _message_id: &str,
        content: &str,
    ) -> Result<(), EditError> {
        println!("{}", content);
        Ok(())
    }

    async fn delete_message(
        &self,
        _application_id: &str,
        _interaction_token: &str,
        _message_id: &str,
    ) -> Result<(), EditError> {
        Ok(())
    }
}
