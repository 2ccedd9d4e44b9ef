//! Error taxonomy for tool invocations
//!
//! Every failure a caller can see is one of these kinds. The chat-facing
//! layer only shows the message text, so each variant renders a sentence a
//! user can read.

use std::time::Duration;

use thiserror::Error;

/// Failure of a tool invocation
#[derive(Error, Debug)]
pub enum ToolError {
    /// Another invocation holds the gate; no I/O was attempted
    #[error("tool server is busy with another request, please try again later")]
    Busy,

    /// Handshake or tool listing failed; the session is left disconnected
    #[error("failed to connect to tool server: {0:#}")]
    Connection(#[source] anyhow::Error),

    /// The call did not finish before its deadline
    #[error("call to tool '{tool}' timed out after {}s", .elapsed.as_secs_f64())]
    Timeout { tool: String, elapsed: Duration },

    /// The server or transport reported an error while running the call
    #[error("call to tool '{tool}' failed: {message}")]
    Invocation { tool: String, message: String },

    /// The result envelope arrived but its text payload did not decode
    #[error("tool '{tool}' returned a malformed result: {reason}")]
    MalformedResult { tool: String, reason: String },
}

impl ToolError {
    /// Short label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Busy => "busy",
            ToolError::Connection(_) => "connection",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Invocation { .. } => "invocation",
            ToolError::MalformedResult { .. } => "malformed_result",
        }
    }
}

/// Result type alias for tool invocations
pub type ToolResult<T> = Result<T, ToolError>;
