//! Shared MCP client types

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

/// A tool advertised by the server
///
/// The cached list is advisory: calls are never checked against it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema (JSON)
    pub input_schema: Option<Value>,
}

/// A progress notification emitted by the server while a call is running
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(progress: f64) -> Self {
        Self {
            progress,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Decode from a raw `notifications/progress` params object
    pub fn from_params(params: Value) -> Option<Self> {
        serde_json::from_value(params).ok()
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{}", self.progress, total)?,
            None => write!(f, "{}", self.progress)?,
        }
        if let Some(message) = &self.message {
            write!(f, " {}", message)?;
        }
        Ok(())
    }
}

/// Caller-supplied callback receiving progress events as they arrive
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
