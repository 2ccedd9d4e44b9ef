//! Transport bindings
//!
//! [`Connector`] produces a fresh [`ToolChannel`] per session. The production
//! connector speaks MCP through rmcp over either a child process (stdio) or a
//! streamable HTTP endpoint; which one is fixed by configuration.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ClientInfo, Implementation,
        ProgressNotificationParam,
    },
    service::{NotificationContext, RunningService},
    transport::{
        common::client_side_sse::SseRetryPolicy,
        streamable_http_client::StreamableHttpClientTransportConfig,
        StreamableHttpClientTransport, TokioChildProcess,
    },
    ClientHandler, RoleClient, ServiceExt,
};
use tokio::process::Command;

use super::types::{ProgressEvent, ProgressSink, ToolDescriptor};
use super::JsonObject;
use crate::config::{ClientConfig, HttpTransportConfig, TransportConfig};

/// Opens channels to the tool server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel and complete the protocol handshake
    async fn connect(&self) -> Result<Box<dyn ToolChannel>>;
}

/// A live, initialized connection to the tool server
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// List every tool the server advertises
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Call a tool, forwarding each progress notification to `progress`
    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
        progress: Option<ProgressSink>,
    ) -> Result<CallToolResult>;

    /// Shut the connection down
    async fn close(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// rmcp-backed connector
// =============================================================================

/// Connector for the configured stdio or streamable HTTP binding
pub struct RmcpConnector {
    config: ClientConfig,
}

impl RmcpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    async fn connect_stdio(
        &self,
        command: &str,
        args: &[String],
        handler: ProgressRelay,
    ) -> Result<RunningService<RoleClient, ProgressRelay>> {
        tracing::debug!("Spawning MCP server: {} {:?}", command, args);

        let mut cmd = Command::new(command);
        for arg in args {
            let expanded = shellexpand::env(arg).unwrap_or_else(|_| arg.clone().into());
            cmd.arg(expanded.as_ref());
        }

        let transport = TokioChildProcess::new(cmd)
            .with_context(|| format!("failed to spawn MCP server '{}'", command))?;
        let service = handler
            .serve(transport)
            .await
            .context("failed to initialize stdio client")?;

        tracing::info!("Connected to stdio MCP server '{}'", command);
        Ok(service)
    }

    async fn connect_http(
        &self,
        http: &HttpTransportConfig,
        handler: ProgressRelay,
    ) -> Result<RunningService<RoleClient, ProgressRelay>> {
        tracing::debug!("Connecting to streamable HTTP MCP server at {}", http.url);

        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout.min(http.headers_timeout))
            .read_timeout(http.sse_read_timeout)
            .timeout(http.body_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let mut cfg = StreamableHttpClientTransportConfig::with_uri(http.url.as_str());
        cfg.retry_config = Arc::new(CappedBackoff::new(
            http.max_retries,
            http.max_reconnection_delay,
        ));

        let transport = StreamableHttpClientTransport::with_client(client, cfg);
        let service = handler
            .serve(transport)
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize streamable client: {}", e))?;

        tracing::info!("Connected to streamable HTTP MCP server at {}", http.url);
        Ok(service)
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(&self) -> Result<Box<dyn ToolChannel>> {
        let relay = ProgressRelay::new(&self.config);

        let service = match &self.config.transport {
            TransportConfig::Stdio { command, args } => {
                self.connect_stdio(command, args, relay.clone()).await?
            }
            TransportConfig::StreamableHttp(http) => self.connect_http(http, relay.clone()).await?,
        };

        Ok(Box::new(RmcpChannel { service, relay }))
    }
}

/// Channel over a running rmcp client service
struct RmcpChannel {
    service: RunningService<RoleClient, ProgressRelay>,
    relay: ProgressRelay,
}

#[async_trait]
impl ToolChannel for RmcpChannel {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .service
            .peer()
            .list_all_tools()
            .await
            .context("failed to list tools")?;

        Ok(tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: serde_json::to_value(&t.input_schema).ok(),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
        progress: Option<ProgressSink>,
    ) -> Result<CallToolResult> {
        // Cleared on drop so an abandoned call stops forwarding.
        let _installed = self.relay.install(progress);

        self.service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
                task: None,
            })
            .await
            .context("failed to call tool")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.service
            .cancel()
            .await
            .context("failed to stop MCP client service")?;
        Ok(())
    }
}

// =============================================================================
// Client handler: identity + progress forwarding
// =============================================================================

/// rmcp client handler that forwards progress notifications to the sink of
/// the call currently in flight
#[derive(Clone)]
struct ProgressRelay {
    name: String,
    version: String,
    sink: Arc<Mutex<Option<ProgressSink>>>,
}

impl ProgressRelay {
    fn new(config: &ClientConfig) -> Self {
        Self {
            name: config.client_name.clone(),
            version: config.client_version.clone(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    fn install(&self, sink: Option<ProgressSink>) -> InstalledSink<'_> {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = sink;
        }
        InstalledSink { relay: self }
    }

    fn current(&self) -> Option<ProgressSink> {
        self.sink.lock().ok().and_then(|slot| (*slot).clone())
    }
}

struct InstalledSink<'a> {
    relay: &'a ProgressRelay,
}

impl Drop for InstalledSink<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.relay.sink.lock() {
            *slot = None;
        }
    }
}

impl ClientHandler for ProgressRelay {
    async fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let Some(sink) = self.current() else {
            tracing::debug!("Dropping progress notification with no active call");
            return;
        };

        match serde_json::to_value(&params)
            .ok()
            .and_then(ProgressEvent::from_params)
        {
            Some(event) => sink(event),
            None => tracing::warn!("Ignoring undecodable progress notification"),
        }
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            client_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

// =============================================================================
// Reconnection policy
// =============================================================================

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Exponential backoff for SSE stream reconnection, capped in both attempt
/// count and per-attempt delay
#[derive(Debug, Clone)]
struct CappedBackoff {
    max_retries: usize,
    max_delay: Duration,
}

impl CappedBackoff {
    fn new(max_retries: usize, max_delay: Duration) -> Self {
        Self {
            max_retries,
            max_delay,
        }
    }
}

impl SseRetryPolicy for CappedBackoff {
    fn retry(&self, current_times: usize) -> Option<Duration> {
        if current_times >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(current_times.min(31) as u32);
        Some(
            RECONNECT_BASE_DELAY
                .saturating_mul(factor)
                .min(self.max_delay),
        )
    }
}
