//! Tool result decoding
//!
//! Results are decoded in two stages: the `CallToolResult` envelope is
//! already typed by the protocol layer, and the first text item inside it is
//! then decoded as JSON into the structure the caller expects.

use rmcp::model::{CallToolResult, RawContent};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::{ToolError, ToolResult};

/// Payload returned by the `gen_design` tool
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderedDesign {
    /// Reference (usually a URL) to the rendered image
    pub rendered_image: String,
}

/// First text item of a result envelope
pub fn text_payload(result: &CallToolResult) -> Option<&str> {
    result.content.first().and_then(|c| match &c.raw {
        RawContent::Text(t) => Some(t.text.as_str()),
        _ => None,
    })
}

/// Decode the first text item of `result` as JSON into `T`
pub fn decode_text_payload<T: DeserializeOwned>(
    tool: &str,
    result: &CallToolResult,
) -> ToolResult<T> {
    let text = text_payload(result).ok_or_else(|| ToolError::MalformedResult {
        tool: tool.to_string(),
        reason: "result has no text content".to_string(),
    })?;

    serde_json::from_str(text).map_err(|e| ToolError::MalformedResult {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}
