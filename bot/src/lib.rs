//! Design bot
//!
//! Routes chat commands to a long-running MCP tool server. The tool client
//! allows one call in flight at a time, opens a fresh session per call and
//! bounds each call with a deadline.

pub mod config;
pub mod discord;
pub mod interactions;
pub mod mcp;
