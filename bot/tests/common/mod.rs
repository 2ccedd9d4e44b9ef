//! In-process design tool server for integration tests

use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Meta, ProgressNotificationParam, ServerCapabilities,
        ServerInfo,
    },
    tool, tool_handler, tool_router,
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    },
    ErrorData as McpError, Peer, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::net::TcpListener;

pub const RENDERED_IMAGE: &str = "http://x/y.png";

/// Messages `progress_design` reports, in order
pub const PROGRESS_MESSAGES: [&str; 3] = ["e1", "e2", "e3"];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DesignParams {
    #[schemars(description = "What to design")]
    pub prompt: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SlowParams {
    #[schemars(description = "How long to work before answering")]
    pub millis: u64,
}

#[derive(Clone)]
pub struct DesignServer {
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl DesignServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Render a design from a prompt")]
    async fn gen_design(
        &self,
        Parameters(params): Parameters<DesignParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("rendering {}", params.prompt);
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{{\"rendered_image\":\"{}\"}}",
            RENDERED_IMAGE
        ))]))
    }

    #[tool(description = "Render nothing, slowly")]
    async fn slow_design(
        &self,
        Parameters(params): Parameters<SlowParams>,
    ) -> Result<CallToolResult, McpError> {
        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(CallToolResult::success(vec![Content::text("{}")]))
    }

    #[tool(description = "Report three progress steps, then finish")]
    async fn progress_design(
        &self,
        meta: Meta,
        client: Peer<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(token) = meta.get_progress_token() {
            for (step, message) in PROGRESS_MESSAGES.iter().enumerate() {
                client
                    .notify_progress(ProgressNotificationParam {
                        progress_token: token.clone(),
                        progress: (step + 1) as f64,
                        total: Some(PROGRESS_MESSAGES.len() as f64),
                        message: Some(message.to_string()),
                    })
                    .await
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                // Let the client drain the notification before the next one.
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Ok(CallToolResult::success(vec![Content::text("done")]))
    }

    #[tool(description = "Always fails")]
    async fn broken_design(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::error(vec![Content::text("renderer crashed")]))
    }
}

#[tool_handler]
impl ServerHandler for DesignServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Design server for tests".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub struct TestServer {
    pub port: u16,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let service = StreamableHttpService::new(
            || Ok(DesignServer::new()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let app = axum::Router::new().nest_service("/mcp", service);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        Self { port, handle }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/mcp", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A local port with nothing listening on it
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
