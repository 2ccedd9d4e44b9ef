//! MCP (Model Context Protocol) tool client
//!
//! A single-flight client for one long-running tool server. Every call
//! tears down the previous session and connects fresh, runs under a
//! deadline, and is rejected outright while another call holds the gate.

mod client;
mod error;
mod gate;
mod result;
mod session;
mod transport;
mod types;

pub use client::{ToolCall, ToolClient};
pub use error::{ToolError, ToolResult};
pub use gate::{BusyGate, GatePermit};
pub use result::{decode_text_payload, text_payload, RenderedDesign};
pub use session::{Session, SessionState};
pub use transport::{Connector, RmcpConnector, ToolChannel};
pub use types::{ProgressEvent, ProgressSink, ToolDescriptor};

/// Argument mapping sent with a tool call
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
