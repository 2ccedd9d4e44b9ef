//! Session lifecycle
//!
//! `Disconnected -> connect -> Connected -> disconnect -> Disconnected`.
//! A failed connect never leaves a half-open channel behind.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::Instant;

use super::error::{ToolError, ToolResult};
use super::transport::{Connector, ToolChannel};
use super::types::ToolDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Owns at most one live channel and the tools it advertised
pub struct Session {
    connector: Arc<dyn Connector>,
    handshake_timeout: Duration,
    channel: Option<Box<dyn ToolChannel>>,
    tools: Vec<ToolDescriptor>,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>, handshake_timeout: Duration) -> Self {
        Self {
            connector,
            handshake_timeout,
            channel: None,
            tools: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.channel.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Tools cached from the last successful connect
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// The live channel, if connected
    pub fn channel(&self) -> Option<&dyn ToolChannel> {
        self.channel.as_deref()
    }

    /// Connect and cache the tool list; no-op when already connected
    pub async fn connect(&mut self) -> ToolResult<()> {
        self.connect_within(self.handshake_timeout).await
    }

    /// Like [`Session::connect`], with the handshake bounded by the shorter
    /// of `limit` and the session's own handshake deadline
    pub async fn connect_within(&mut self, limit: Duration) -> ToolResult<()> {
        if self.channel.is_some() {
            return Ok(());
        }

        let limit = limit.min(self.handshake_timeout);
        let deadline = Instant::now() + limit;

        let channel = tokio::time::timeout_at(deadline, self.connector.connect())
            .await
            .map_err(|_| {
                ToolError::Connection(anyhow!("handshake timed out after {:?}", limit))
            })?
            .map_err(ToolError::Connection)?;

        let listed = tokio::time::timeout_at(deadline, channel.list_tools()).await;
        let tools = match listed {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                Self::close_quietly(channel).await;
                return Err(ToolError::Connection(e));
            }
            Err(_) => {
                Self::close_quietly(channel).await;
                return Err(ToolError::Connection(anyhow!(
                    "tool listing timed out after {:?}",
                    limit
                )));
            }
        };

        tracing::info!(
            "Connected to MCP server with tools: {:?}",
            tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );

        self.tools = tools;
        self.channel = Some(channel);
        Ok(())
    }

    /// Close the channel if one is held; idempotent
    pub async fn disconnect(&mut self) {
        self.tools.clear();
        if let Some(channel) = self.channel.take() {
            Self::close_quietly(channel).await;
            tracing::debug!("Disconnected from MCP server");
        }
    }

    async fn close_quietly(channel: Box<dyn ToolChannel>) {
        if let Err(e) = channel.close().await {
            tracing::warn!("Failed to close MCP channel cleanly: {:#}", e);
        }
    }
}
