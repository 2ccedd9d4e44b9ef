//! Single-flight tool invoker
//!
//! Each call runs: take gate -> disconnect -> connect -> call raced against
//! the deadline -> classify -> release gate. The gate is taken before any
//! I/O so a rejected call never touches the server.
//!
//! On timeout the client stops waiting but sends no cancellation; the server
//! may keep working until the next call tears the session down.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use rmcp::model::{CallToolResult, RawContent};
use tokio::sync::Mutex;

use super::error::{ToolError, ToolResult};
use super::gate::{BusyGate, GatePermit};
use super::session::Session;
use super::transport::{Connector, RmcpConnector};
use super::types::{ProgressEvent, ProgressSink, ToolDescriptor};
use super::JsonObject;
use crate::config::ClientConfig;

/// One tool invocation request
pub struct ToolCall {
    name: String,
    arguments: JsonObject,
    progress: Option<ProgressSink>,
    timeout: Option<Duration>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: JsonObject::new(),
            progress: None,
            timeout: None,
        }
    }

    pub fn arguments(mut self, arguments: JsonObject) -> Self {
        self.arguments = arguments;
        self
    }

    /// Insert a single argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn on_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Override the configured call timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Client for a single long-running MCP tool server
pub struct ToolClient {
    config: ClientConfig,
    gate: BusyGate,
    session: Mutex<Session>,
    /// Last published session state, readable while a call holds the session
    status: RwLock<SessionStatus>,
}

#[derive(Debug, Clone, Default)]
struct SessionStatus {
    connected: bool,
    tools: Vec<ToolDescriptor>,
}

impl ToolClient {
    /// Client using the configured transport and its own gate
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(RmcpConnector::new(config.clone()));
        Self::with_connector(config, connector, BusyGate::new())
    }

    /// Client using a custom connector, sharing `gate` with any other client
    /// built from a clone of it
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        gate: BusyGate,
    ) -> Self {
        let session = Session::new(connector, config.handshake_timeout());
        Self {
            config,
            gate,
            session: Mutex::new(session),
            status: RwLock::new(SessionStatus::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gate(&self) -> &BusyGate {
        &self.gate
    }

    /// Whether a call is in flight on this client's gate
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub async fn connect(&self) -> ToolResult<()> {
        let mut session = self.session.lock().await;
        let connected = session.connect().await;
        self.publish(&session);
        connected
    }

    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        session.disconnect().await;
        self.publish(&session);
    }

    /// Never waits on a call in flight
    pub fn is_connected(&self) -> bool {
        self.status.read().map(|s| s.connected).unwrap_or(false)
    }

    /// Tools advertised by the server at the last connect
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.status
            .read()
            .map(|s| s.tools.clone())
            .unwrap_or_default()
    }

    fn publish(&self, session: &Session) {
        if let Ok(mut status) = self.status.write() {
            status.connected = session.is_connected();
            status.tools = session.tools().to_vec();
        }
    }

    /// Call a tool with the default timeout and no progress sink
    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> ToolResult<CallToolResult> {
        self.call(ToolCall::new(name).arguments(arguments)).await
    }

    /// Run one invocation
    pub async fn call(&self, call: ToolCall) -> ToolResult<CallToolResult> {
        let permit = self.gate.try_acquire().inspect_err(|_| {
            tracing::warn!("Rejecting call to tool '{}': server busy", call.name);
        })?;
        self.call_with_permit(permit, call).await
    }

    /// Run one invocation under a permit already taken from this client's
    /// gate; the permit is released when the call finishes
    pub async fn call_with_permit(
        &self,
        permit: GatePermit,
        call: ToolCall,
    ) -> ToolResult<CallToolResult> {
        if !permit.belongs_to(&self.gate) {
            tracing::warn!(
                "Rejecting call to tool '{}': permit is for another gate",
                call.name
            );
            return Err(ToolError::Busy);
        }
        let _permit = permit;

        let ToolCall {
            name,
            arguments,
            progress,
            timeout,
        } = call;
        let timeout = timeout.unwrap_or(self.config.call_timeout);

        let mut session = self.session.lock().await;

        // Always start from a fresh server-side context.
        session.disconnect().await;
        let connected = session.connect_within(timeout).await;
        self.publish(&session);
        connected?;

        let channel = session
            .channel()
            .ok_or_else(|| ToolError::Connection(anyhow!("session closed before the call")))?;

        tracing::debug!("Calling tool '{}' (timeout {:?})", name, timeout);
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(timeout, channel.call_tool(&name, arguments, progress)).await;

        let result = match outcome {
            Err(_) => Err(ToolError::Timeout {
                tool: name.clone(),
                elapsed: timeout,
            }),
            Ok(Err(e)) => Err(ToolError::Invocation {
                tool: name.clone(),
                message: format!("{:#}", e),
            }),
            Ok(Ok(result)) if result.is_error == Some(true) => Err(ToolError::Invocation {
                tool: name.clone(),
                message: error_text(&result),
            }),
            Ok(Ok(result)) => Ok(result),
        };

        match &result {
            Ok(_) => tracing::info!(
                "Tool '{}' completed in {:.1}s",
                name,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => tracing::error!(kind = e.kind(), "Failed to call tool {}: {}", name, e),
        }

        result
    }
}

/// Text of an `isError` result, or a generic message when it carries none
fn error_text(result: &CallToolResult) -> String {
    let text: Vec<&str> = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect();

    if text.is_empty() {
        "server reported an error without details".to_string()
    } else {
        text.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolChannel;
    use async_trait::async_trait;
    use rmcp::model::Content;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Notify};

    /// What the stub channel does when called
    #[derive(Clone)]
    enum Behavior {
        Reply(String),
        ServerError(String),
        ToolError(String),
        Hang,
        /// Emit progress events, then reply
        Progress(Vec<ProgressEvent>, String),
        /// Report entry, then wait for release before replying
        Block(mpsc::UnboundedSender<()>, Arc<Notify>),
        PanicInSink,
    }

    struct StubConnector {
        behavior: Behavior,
        fail_connect: bool,
        connects: AtomicUsize,
        /// Channel id that served each call, in order
        served_by: Arc<StdMutex<Vec<usize>>>,
        calls: Arc<AtomicUsize>,
    }

    impl StubConnector {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                fail_connect: false,
                connects: AtomicUsize::new(0),
                served_by: Arc::new(StdMutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                fail_connect: true,
                ..Self::new(Behavior::Hang)
            }
        }
    }

    struct StubChannel {
        id: usize,
        behavior: Behavior,
        served_by: Arc<StdMutex<Vec<usize>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn connect(&self) -> anyhow::Result<Box<dyn ToolChannel>> {
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                anyhow::bail!("connection refused");
            }
            Ok(Box::new(StubChannel {
                id,
                behavior: self.behavior.clone(),
                served_by: self.served_by.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    #[async_trait]
    impl ToolChannel for StubChannel {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: JsonObject,
            progress: Option<ProgressSink>,
        ) -> anyhow::Result<CallToolResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.served_by.lock().unwrap().push(self.id);

            match &self.behavior {
                Behavior::Reply(text) => {
                    Ok(CallToolResult::success(vec![Content::text(text.clone())]))
                }
                Behavior::ServerError(message) => anyhow::bail!("{}", message),
                Behavior::ToolError(text) => {
                    Ok(CallToolResult::error(vec![Content::text(text.clone())]))
                }
                Behavior::Hang => std::future::pending().await,
                Behavior::Progress(events, text) => {
                    if let Some(sink) = progress {
                        for event in events {
                            sink(event.clone());
                        }
                    }
                    Ok(CallToolResult::success(vec![Content::text(text.clone())]))
                }
                Behavior::Block(entered, release) => {
                    let _ = entered.send(());
                    release.notified().await;
                    Ok(CallToolResult::success(vec![Content::text("done")]))
                }
                Behavior::PanicInSink => {
                    if let Some(sink) = progress {
                        sink(ProgressEvent::new(1.0));
                    }
                    Ok(CallToolResult::success(vec![Content::text("unreachable")]))
                }
            }
        }

        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn client(connector: Arc<StubConnector>) -> ToolClient {
        ToolClient::with_connector(ClientConfig::default(), connector, BusyGate::new())
    }

    fn first_text(result: &CallToolResult) -> &str {
        match &result.content[0].raw {
            RawContent::Text(t) => t.text.as_str(),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_call_returns_envelope() {
        let connector = Arc::new(StubConnector::new(Behavior::Reply("ok".into())));
        let client = client(connector.clone());

        let result = client.call(ToolCall::new("gen_design").arg("prompt", "ring")).await.unwrap();

        assert_eq!(first_text(&result), "ok");
        assert!(!client.is_busy());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_second_call_while_in_flight_is_busy_without_io() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let connector = Arc::new(StubConnector::new(Behavior::Block(entered_tx, release.clone())));
        let client = Arc::new(client(connector.clone()));

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.call_tool("gen_design", JsonObject::new()).await }
        });
        entered_rx.recv().await.unwrap();

        let err = client.call_tool("gen_design", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Busy));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);

        // Status reads answer from the snapshot while the session is locked.
        assert!(client.is_connected());
        assert!(client.tools().is_empty());

        release.notify_one();
        first.await.unwrap().unwrap();
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_clients_sharing_a_gate_exclude_each_other() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let gate = BusyGate::new();

        let busy_connector =
            Arc::new(StubConnector::new(Behavior::Block(entered_tx, release.clone())));
        let idle_connector = Arc::new(StubConnector::new(Behavior::Reply("ok".into())));
        let first = Arc::new(ToolClient::with_connector(
            ClientConfig::default(),
            busy_connector,
            gate.clone(),
        ));
        let second =
            ToolClient::with_connector(ClientConfig::default(), idle_connector.clone(), gate);

        let handle = tokio::spawn({
            let first = first.clone();
            async move { first.call_tool("gen_design", JsonObject::new()).await }
        });
        entered_rx.recv().await.unwrap();

        assert!(second.is_busy());
        let err = second.call_tool("gen_design", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Busy));
        assert_eq!(idle_connector.connects.load(Ordering::SeqCst), 0);

        release.notify_one();
        handle.await.unwrap().unwrap();
        assert!(second.call_tool("gen_design", JsonObject::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_every_call_uses_a_fresh_channel() {
        let connector = Arc::new(StubConnector::new(Behavior::Reply("ok".into())));
        let client = client(connector.clone());

        client.connect().await.unwrap();
        client.call_tool("gen_design", JsonObject::new()).await.unwrap();
        client.call_tool("gen_design", JsonObject::new()).await.unwrap();

        // Initial connect plus one reconnect per call
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        let served = connector.served_by.lock().unwrap().clone();
        assert_eq!(served, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_timeout_fires_at_the_deadline() {
        let connector = Arc::new(StubConnector::new(Behavior::Hang));
        let client = client(connector);
        let deadline = Duration::from_millis(100);

        let started = Instant::now();
        let err = client
            .call(ToolCall::new("gen_design").timeout(deadline))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match err {
            ToolError::Timeout { tool, elapsed } => {
                assert_eq!(tool, "gen_design");
                assert_eq!(elapsed, deadline);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(elapsed >= deadline);
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_progress_is_forwarded_in_order() {
        let events = vec![
            ProgressEvent::new(1.0).with_message("e1"),
            ProgressEvent::new(2.0).with_message("e2"),
            ProgressEvent::new(3.0).with_message("e3"),
        ];
        let connector = Arc::new(StubConnector::new(Behavior::Progress(events, "final".into())));
        let client = client(connector);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let result = client
            .call(ToolCall::new("gen_design").on_progress(move |event| {
                sink_seen.lock().unwrap().push(event.message.unwrap_or_default());
            }))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["e1", "e2", "e3"]);
        assert_eq!(first_text(&result), "final");
    }

    #[tokio::test]
    async fn test_failures_are_classified_and_release_the_gate() {
        let client_for = |behavior| client(Arc::new(StubConnector::new(behavior)));

        let err = client_for(Behavior::ServerError("unknown tool: gen_logo".into()))
            .call_tool("gen_logo", JsonObject::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Invocation { .. }));
        assert!(err.to_string().contains("unknown tool: gen_logo"));

        let err = client_for(Behavior::ToolError("prompt rejected".into()))
            .call_tool("gen_design", JsonObject::new())
            .await
            .unwrap_err();
        match err {
            ToolError::Invocation { message, .. } => assert_eq!(message, "prompt rejected"),
            other => panic!("expected invocation failure, got {:?}", other),
        }

        let failing = client(Arc::new(StubConnector::failing()));
        let err = failing.call_tool("gen_design", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Connection(_)));
        assert!(!failing.is_busy());
        assert!(!failing.is_connected());
    }

    #[tokio::test]
    async fn test_gate_released_after_panicking_sink() {
        let connector = Arc::new(StubConnector::new(Behavior::PanicInSink));
        let client = Arc::new(client(connector));

        let handle = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call(ToolCall::new("gen_design").on_progress(|_| panic!("sink failure")))
                    .await
            }
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_empty_arguments_are_valid() {
        let connector = Arc::new(StubConnector::new(Behavior::Reply("ok".into())));
        let client = client(connector.clone());

        assert!(client.call_tool("anything", JsonObject::new()).await.is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self) -> anyhow::Result<Box<dyn ToolChannel>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_handshake_is_bounded_by_call_timeout() {
        let client = ToolClient::with_connector(
            ClientConfig::default(),
            Arc::new(HangingConnector),
            BusyGate::new(),
        );

        let started = std::time::Instant::now();
        let err = client
            .call(ToolCall::new("gen_design").timeout(std::time::Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Connection(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(!client.is_busy());
        assert!(!client.is_connected());
    }
}
