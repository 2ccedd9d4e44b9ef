//! Configuration loading
//!
//! The tool client is configured from `MCP_*` environment variables. An
//! optional `.design-bot.toml` supplies defaults for any variable that is not
//! set; its `[mcp]` table uses the variable names without the `MCP_` prefix,
//! lowercased (`transport = "stdio"`, `stdio_args = ["server.py"]`, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Base timeout for a single tool call (20 minutes)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Deadline for reaching the server and completing the handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_CLIENT_NAME: &str = "design-bot";
const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:12001/mcp";
const DEFAULT_STDIO_COMMAND: &str = "python";
const DEFAULT_STDIO_ARGS: &str = "main.py";
const DEFAULT_MAX_RECONNECTION_DELAY: Duration = Duration::from_millis(600);
const DEFAULT_MAX_RETRIES: usize = 10;

const CONFIG_FILE_NAME: &str = ".design-bot.toml";

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown MCP transport '{0}' (expected 'stdio' or 'streamablehttp')")]
    UnknownTransport(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("invalid MCP endpoint URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which binding is used to reach the tool server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Spawn a child process and speak MCP over its stdin/stdout
    Stdio { command: String, args: Vec<String> },
    /// Connect to a remote streamable HTTP endpoint
    StreamableHttp(HttpTransportConfig),
}

impl TransportConfig {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::StreamableHttp(_) => "streamablehttp",
        }
    }
}

/// Timeouts and reconnection limits for the streamable HTTP binding
#[derive(Debug, Clone, PartialEq)]
pub struct HttpTransportConfig {
    pub url: String,
    /// Deadline for the handshake (initialize + tool listing)
    pub request_timeout: Duration,
    /// Maximum idle gap between chunks of an SSE stream
    pub sse_read_timeout: Duration,
    /// Deadline for establishing the connection before response headers
    pub headers_timeout: Duration,
    /// Deadline for a whole HTTP exchange, body included
    pub body_timeout: Duration,
    pub max_reconnection_delay: Duration,
    pub max_retries: usize,
}

impl HttpTransportConfig {
    /// Derive all envelope timeouts from the call timeout so the HTTP layer
    /// never gives up before the call-level deadline does.
    pub fn with_base_timeout(url: impl Into<String>, base: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout: base * 3,
            sse_read_timeout: base * 3,
            headers_timeout: base * 2,
            body_timeout: base * 3,
            max_reconnection_delay: DEFAULT_MAX_RECONNECTION_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Immutable configuration for [`crate::mcp::ToolClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub client_name: String,
    pub client_version: String,
    /// Default deadline for a single tool call
    pub call_timeout: Duration,
    /// Deadline for connect + initialize + tool listing
    pub connect_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transport: TransportConfig::StreamableHttp(HttpTransportConfig::with_base_timeout(
                DEFAULT_HTTP_URL,
                DEFAULT_CALL_TIMEOUT,
            )),
        }
    }
}

impl ClientConfig {
    /// Configuration for a subprocess tool server
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
            },
            ..Self::default()
        }
    }

    /// Configuration for a streamable HTTP tool server with default timeouts
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::StreamableHttp(HttpTransportConfig::with_base_timeout(
                url,
                DEFAULT_CALL_TIMEOUT,
            )),
            ..Self::default()
        }
    }

    /// Load from the environment, falling back to `.design-bot.toml`
    ///
    /// Search order for the file:
    /// 1. Walk up directory tree from cwd
    /// 2. Check ~/.config/design-bot/ (global fallback)
    pub fn load() -> Result<Self, ConfigError> {
        let file = match find_config_file(CONFIG_FILE_NAME) {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                BotFileConfig::load_from_path(&path)?
            }
            None => BotFileConfig::default(),
        };

        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key)))
    }

    /// Build a configuration from the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary `MCP_*` key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let call_timeout = match read("MCP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("MCP_TIMEOUT_SECS", &v)?),
            None => defaults.call_timeout,
        };
        let connect_timeout = match read("MCP_CONNECT_TIMEOUT_SECS") {
            Some(v) => secs("MCP_CONNECT_TIMEOUT_SECS", &v)?,
            None => defaults.connect_timeout,
        };

        let transport_kind = read("MCP_TRANSPORT").unwrap_or_else(|| "streamablehttp".to_string());
        let transport = match transport_kind.trim().to_ascii_lowercase().as_str() {
            "stdio" => {
                let command =
                    read("MCP_STDIO_COMMAND").unwrap_or_else(|| DEFAULT_STDIO_COMMAND.to_string());
                let args = read("MCP_STDIO_ARGS")
                    .unwrap_or_else(|| DEFAULT_STDIO_ARGS.to_string())
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                TransportConfig::Stdio { command, args }
            }
            "streamablehttp" | "streamable-http" | "http" => {
                let url = read("MCP_STREAMABLEHTTP_URL")
                    .unwrap_or_else(|| DEFAULT_HTTP_URL.to_string());
                url::Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
                    url: url.clone(),
                    source,
                })?;

                let mut http = HttpTransportConfig::with_base_timeout(url, call_timeout);
                if let Some(v) = read("MCP_HTTP_REQUEST_TIMEOUT_SECS") {
                    http.request_timeout = secs("MCP_HTTP_REQUEST_TIMEOUT_SECS", &v)?;
                }
                if let Some(v) = read("MCP_HTTP_SSE_READ_TIMEOUT_SECS") {
                    http.sse_read_timeout = secs("MCP_HTTP_SSE_READ_TIMEOUT_SECS", &v)?;
                }
                if let Some(v) = read("MCP_HTTP_HEADERS_TIMEOUT_SECS") {
                    http.headers_timeout = secs("MCP_HTTP_HEADERS_TIMEOUT_SECS", &v)?;
                }
                if let Some(v) = read("MCP_HTTP_BODY_TIMEOUT_SECS") {
                    http.body_timeout = secs("MCP_HTTP_BODY_TIMEOUT_SECS", &v)?;
                }
                if let Some(v) = read("MCP_HTTP_MAX_RECONNECTION_DELAY_MS") {
                    http.max_reconnection_delay = Duration::from_millis(parse_number(
                        "MCP_HTTP_MAX_RECONNECTION_DELAY_MS",
                        &v,
                    )?);
                }
                if let Some(v) = read("MCP_HTTP_MAX_RETRIES") {
                    http.max_retries = parse_number("MCP_HTTP_MAX_RETRIES", &v)?;
                }
                TransportConfig::StreamableHttp(http)
            }
            other => return Err(ConfigError::UnknownTransport(other.to_string())),
        };

        Ok(Self {
            client_name: read("MCP_CLIENT_NAME").unwrap_or(defaults.client_name),
            client_version: read("MCP_CLIENT_VERSION").unwrap_or(defaults.client_version),
            call_timeout,
            connect_timeout,
            transport,
        })
    }

    /// Deadline for connect + handshake + tool listing, independent of the
    /// call timeout
    pub fn handshake_timeout(&self) -> Duration {
        match &self.transport {
            TransportConfig::Stdio { .. } => self.connect_timeout,
            TransportConfig::StreamableHttp(http) => self.connect_timeout.min(http.request_timeout),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_number(key, value).map(Duration::from_secs)
}

/// Find a config file by walking up the directory tree, then checking global config.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("design-bot").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Contents of `.design-bot.toml`
#[derive(Debug, Default, Deserialize)]
pub struct BotFileConfig {
    #[serde(default)]
    pub mcp: HashMap<String, toml::Value>,
}

impl BotFileConfig {
    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Value for an `MCP_*` variable name, rendered the way the env var would be
    fn get(&self, env_key: &str) -> Option<String> {
        let key = env_key.strip_prefix("MCP_")?.to_ascii_lowercase();
        match self.mcp.get(&key)? {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(other.to_string()),
        }
    }
}
