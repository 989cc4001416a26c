use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use switchyard_tools::{ToolCall, ToolError, ToolResult, ToolSchema};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::convert::ResultConverter;
use super::error::{RegistryError, ResolveError};
use super::group_control;
use super::handler::{CallContext, WorkerPool};
use super::mcp::{McpClient, McpError, RemoteClientState};
use super::registry::{ActivationGroup, ResolvedTool, ToolRegistration, ToolRegistry};
use crate::config::ToolkitConfig;
use crate::error::Result;

/// The only toolkit state worth persisting between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitState {
    pub active_groups: Vec<String>,
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancellation_token: Option<CancellationToken>,
}

#[derive(Debug, Default)]
pub struct ToolkitBuilder {
    max_blocking_calls: Option<usize>,
    call_timeout: Option<Duration>,
    converter: Option<ResultConverter>,
}

impl ToolkitBuilder {
    pub fn max_blocking_calls(mut self, max: usize) -> Self {
        self.max_blocking_calls = Some(max);
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn converter(mut self, converter: ResultConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn build(self) -> Toolkit {
        Toolkit {
            registry: Arc::new(ToolRegistry::new()),
            clients: RwLock::new(Vec::new()),
            converter: self.converter.unwrap_or_default(),
            workers: self
                .max_blocking_calls
                .map_or_else(WorkerPool::default, WorkerPool::new),
            call_timeout: self.call_timeout,
        }
    }
}

/// Dispatches tool calls to local handlers and remote MCP clients.
///
/// Every call produces exactly one [`ToolResult`] carrying the call's id;
/// failures are reported as error results, never as `Err`.
pub struct Toolkit {
    registry: Arc<ToolRegistry>,
    clients: RwLock<Vec<Arc<McpClient>>>,
    converter: ResultConverter,
    workers: WorkerPool,
    call_timeout: Option<Duration>,
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("registry", &self.registry)
            .field("clients", &self.clients().len())
            .field("workers", &self.workers.size())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ToolkitBuilder {
        ToolkitBuilder::default()
    }

    /// Build a toolkit from configuration, connecting every configured MCP
    /// server. Servers that fail to come up are logged and skipped.
    pub async fn from_config(config: &ToolkitConfig) -> Result<Self> {
        config.validate()?;
        let toolkit = Self::builder()
            .max_blocking_calls(config.max_blocking_calls)
            .call_timeout(config.call_timeout())
            .build();

        for group in &config.groups {
            toolkit.create_group(&group.name, &group.description, group.active)?;
        }

        for server in &config.mcp_servers {
            let client = Arc::new(server.build_client());
            if let Err(e) = toolkit.add_mcp_client(client).await {
                warn!(target: "toolkit", server = %server.server_name, "Skipping MCP server: {e}");
            }
        }

        Ok(toolkit)
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn register(&self, registration: ToolRegistration) -> Result<(), RegistryError> {
        self.registry.register(registration)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    pub fn create_group(
        &self,
        name: &str,
        description: &str,
        active: bool,
    ) -> Result<(), RegistryError> {
        self.registry.create_group(name, description, active)
    }

    pub fn activate_group(&self, group: &str) -> Result<(), RegistryError> {
        self.registry.activate(group)
    }

    pub fn deactivate_group(&self, group: &str) -> Result<(), RegistryError> {
        self.registry.deactivate(group)
    }

    pub fn groups(&self) -> Vec<ActivationGroup> {
        self.registry.groups()
    }

    pub fn state(&self) -> ToolkitState {
        ToolkitState {
            active_groups: self.registry.active_groups(),
        }
    }

    pub fn restore_state(&self, state: &ToolkitState) {
        self.registry.restore_active_groups(&state.active_groups);
    }

    /// Register the tool that lets the model switch groups on and off. Call
    /// again after creating groups to refresh its schema.
    pub fn register_group_control_tool(&self) -> Result<(), RegistryError> {
        self.registry.unregister(group_control::GROUP_CONTROL_TOOL);
        self.registry
            .register(group_control::registration(&self.registry))
    }

    /// Initialize `client` and route calls to it. Clients added earlier win
    /// when two servers expose the same tool name.
    pub async fn add_mcp_client(&self, client: Arc<McpClient>) -> Result<(), McpError> {
        client.initialize().await?;
        info!(target: "toolkit", server = client.server_name(), "Added MCP client");
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
        Ok(())
    }

    /// Detach and close the client for `server_name`.
    pub async fn remove_mcp_client(&self, server_name: &str) -> Option<Arc<McpClient>> {
        let removed = {
            let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
            let index = clients.iter().position(|c| c.server_name() == server_name)?;
            clients.remove(index)
        };
        if let Err(e) = removed.close().await {
            warn!(target: "toolkit", server = server_name, "Error closing MCP client: {e}");
        }
        Some(removed)
    }

    pub fn clients(&self) -> Vec<Arc<McpClient>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn client_for(&self, tool_name: &str) -> Option<Arc<McpClient>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|client| client.has_tool(tool_name))
            .cloned()
    }

    /// Schemas from every source, sorted by name. A remote tool whose name
    /// is taken by a local tool (active or not) or an earlier client is hidden.
    pub async fn tool_schemas(&self, active_only: bool) -> Vec<ToolSchema> {
        let mut schemas = self.registry.list_schemas(active_only);
        let mut seen: HashSet<String> = schemas.iter().map(|s| s.name.clone()).collect();

        for client in self.clients() {
            if client.state() != RemoteClientState::Ready {
                continue;
            }
            match client.list_tools().await {
                Ok(remote) => {
                    for schema in remote {
                        if self.registry.contains(&schema.name) || !seen.insert(schema.name.clone())
                        {
                            debug!(target: "toolkit", tool = %schema.name, server = client.server_name(), "Remote tool shadowed");
                            continue;
                        }
                        schemas.push(schema);
                    }
                }
                Err(e) => {
                    warn!(target: "toolkit", server = client.server_name(), "Failed to list remote tools: {e}");
                }
            }
        }

        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn call_tool(&self, call: &ToolCall) -> ToolResult {
        self.call_tool_with_options(call, CallOptions::default())
            .await
    }

    pub async fn call_tool_with_options(&self, call: &ToolCall, options: CallOptions) -> ToolResult {
        let token = options.cancellation_token.unwrap_or_default();
        self.execute(call, token, options.timeout.or(self.call_timeout))
            .await
    }

    /// Run all calls concurrently. Results arrive in completion order, one
    /// per input id.
    pub async fn call_tools(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        self.call_tools_with_cancellation(calls, CancellationToken::new())
            .await
    }

    /// Like [`Toolkit::call_tools`]; cancelling `token` or dropping the
    /// returned future cancels every call still running, and those calls
    /// resolve to `Cancelled` error results.
    pub async fn call_tools_with_cancellation(
        &self,
        calls: Vec<ToolCall>,
        token: CancellationToken,
    ) -> Vec<ToolResult> {
        let calls = calls
            .into_iter()
            .map(|call| (call, CallOptions::default()))
            .collect();
        self.call_tools_with_options(calls, token).await
    }

    /// Batch form of [`Toolkit::call_tool_with_options`]. Each call keeps its
    /// own deadline and token on top of the batch-wide `token`.
    pub async fn call_tools_with_options(
        &self,
        calls: Vec<(ToolCall, CallOptions)>,
        token: CancellationToken,
    ) -> Vec<ToolResult> {
        let batch = token.child_token();
        let _cancel_on_drop = batch.clone().drop_guard();

        let mut ids = HashSet::with_capacity(calls.len());
        for (call, _) in &calls {
            if !ids.insert(call.id()) {
                warn!(target: "toolkit", id = call.id(), "Duplicate tool call id in batch");
            }
        }

        debug!(target: "toolkit", count = calls.len(), "Dispatching tool calls");
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .map(|(call, options)| {
                let token = match &options.cancellation_token {
                    Some(own) => linked_token(&batch, own.clone()),
                    None => batch.child_token(),
                };
                let timeout = options.timeout.or(self.call_timeout);
                async move {
                    let _finished = token.clone().drop_guard();
                    self.execute(call, token, timeout).await
                }
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        while let Some(result) = pending.next().await {
            results.push(result);
        }
        results
    }

    #[instrument(skip(self, call, token, timeout), fields(tool.name = %call.name(), tool.id = %call.id()))]
    async fn execute(
        &self,
        call: &ToolCall,
        token: CancellationToken,
        timeout: Option<Duration>,
    ) -> ToolResult {
        let work = with_deadline(call.name(), timeout, self.dispatch(call, token.clone()));
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(ToolError::cancelled(call.name())),
            outcome = work => outcome,
        };

        match outcome {
            Ok(result) => {
                debug!(target: "toolkit", is_error = result.is_error(), "Tool call finished");
                result
            }
            Err(error) => {
                debug!(target: "toolkit", "Tool call failed: {error}");
                ToolResult::error(call, &error)
            }
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        match self.registry.resolve(call.name()) {
            Ok(tool) => self.run_local(call, &tool, token).await,
            Err(ResolveError::NotActive) => Err(ToolError::inactive_tool(call.name())),
            Err(ResolveError::NotFound) => {
                let client = self
                    .client_for(call.name())
                    .ok_or_else(|| ToolError::unknown_tool(call.name()))?;
                client
                    .call_tool(call)
                    .await
                    .map_err(|e| ToolError::transport(call.name(), e.to_string()))
            }
        }
    }

    async fn run_local(
        &self,
        call: &ToolCall,
        tool: &ResolvedTool,
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let arguments = tool.prepare_arguments(call.arguments())?;
        let ctx = CallContext {
            tool_call_id: call.id().to_string(),
            tool_name: call.name().to_string(),
            cancellation_token: token,
            workers: self.workers.clone(),
        };

        let pending = std::panic::catch_unwind(AssertUnwindSafe(|| tool.invoke(arguments, ctx)))
            .map_err(|payload| panicked(call.name(), payload.as_ref()))?;
        let value = AssertUnwindSafe(pending)
            .catch_unwind()
            .await
            .map_err(|payload| panicked(call.name(), payload.as_ref()))??;

        Ok(ToolResult::success(call, self.converter.convert(value)))
    }

    /// Close every MCP client.
    pub async fn shutdown(&self) {
        let clients = std::mem::take(
            &mut *self.clients.write().unwrap_or_else(PoisonError::into_inner),
        );
        for client in clients {
            if let Err(e) = client.close().await {
                warn!(target: "toolkit", server = client.server_name(), "Error closing MCP client: {e}");
            }
        }
        info!(target: "toolkit", "Toolkit shut down");
    }
}

async fn with_deadline<F>(
    tool_name: &str,
    timeout: Option<Duration>,
    work: F,
) -> Result<ToolResult, ToolError>
where
    F: Future<Output = Result<ToolResult, ToolError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(ToolError::timeout(tool_name, limit))),
        None => work.await,
    }
}

/// Child of `batch` that is also cancelled when `own` is. The watcher task
/// ends once the returned token is cancelled.
fn linked_token(batch: &CancellationToken, own: CancellationToken) -> CancellationToken {
    let linked = batch.child_token();
    if own.is_cancelled() {
        linked.cancel();
        return linked;
    }
    let watcher = linked.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = own.cancelled() => watcher.cancel(),
            () = watcher.cancelled() => {}
        }
    });
    linked
}

fn panicked(tool_name: &str, payload: &(dyn Any + Send)) -> ToolError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ToolError::execution(tool_name, format!("handler panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeRemote;
    use crate::tools::convert::ReturnValue;
    use proptest::prelude::*;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use switchyard_tools::{ContentBlock, InputSchema};

    fn schema(name: &str) -> ToolSchema {
        ToolSchema::new(name, format!("{name} tool"), InputSchema::default())
    }

    fn add_schema() -> ToolSchema {
        let properties = serde_json::from_value(json!({
            "a": {"type": "number"},
            "b": {"type": "number"}
        }))
        .unwrap();
        ToolSchema::new(
            "add",
            "Add two numbers",
            InputSchema::object(properties, vec!["a".to_string(), "b".to_string()]),
        )
    }

    fn add(args: Map<String, Value>) -> Result<i64, String> {
        let a = args.get("a").and_then(Value::as_i64).ok_or("a must be an integer")?;
        let b = args.get("b").and_then(Value::as_i64).ok_or("b must be an integer")?;
        a.checked_add(b).ok_or_else(|| "overflow".to_string())
    }

    fn toolkit_with_add() -> Toolkit {
        let toolkit = Toolkit::new();
        toolkit
            .register(ToolRegistration::sync(add_schema(), add))
            .unwrap();
        toolkit
    }

    fn sleeper(name: &str) -> ToolRegistration {
        ToolRegistration::deferred(schema(name), |_args, _ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>("woke up")
        })
    }

    fn by_id<'a>(results: &'a [ToolResult], id: &str) -> &'a ToolResult {
        results.iter().find(|r| r.id() == id).unwrap()
    }

    #[tokio::test]
    async fn test_known_and_unknown_in_one_batch() {
        let toolkit = toolkit_with_add();
        let results = toolkit
            .call_tools(vec![
                ToolCall::new("r1", "add", json!({"a": 10, "b": 20})).unwrap(),
                ToolCall::new("r2", "bogus", json!({})).unwrap(),
            ])
            .await;

        assert_eq!(results.len(), 2);
        let r1 = by_id(&results, "r1");
        assert!(!r1.is_error());
        assert_eq!(r1.output(), &[ContentBlock::text("30")]);

        let r2 = by_id(&results, "r2");
        assert!(r2.is_error());
        assert_eq!(r2.text(), "Error: Unknown tool: bogus");
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_affect_sibling() {
        let toolkit = toolkit_with_add();
        toolkit
            .register(ToolRegistration::sync(schema("always_fails"), |_args| {
                Err::<(), _>("the disk is full")
            }))
            .unwrap();

        let results = toolkit
            .call_tools(vec![
                ToolCall::new("bad", "always_fails", json!({})).unwrap(),
                ToolCall::new("good", "add", json!({"a": 1, "b": 2})).unwrap(),
            ])
            .await;

        let bad = by_id(&results, "bad");
        assert!(bad.is_error());
        assert!(bad.text().contains("Error:"));
        assert!(bad.text().contains("the disk is full"));
        assert_eq!(by_id(&results, "good").text(), "3");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let toolkit = Toolkit::new();
        toolkit
            .register(ToolRegistration::deferred(
                schema("panics"),
                |_args, _ctx| async {
                    if true {
                        panic!("invariant broken");
                    }
                    Ok::<_, String>(())
                },
            ))
            .unwrap();

        let result = toolkit
            .call_tool(&ToolCall::new("p1", "panics", json!({})).unwrap())
            .await;
        assert!(result.is_error());
        assert_eq!(result.text(), "Error: panics failed: handler panicked: invariant broken");
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_rejected() {
        let toolkit = toolkit_with_add();
        let result = toolkit
            .call_tool(&ToolCall::new("r1", "add", json!({"a": "ten"})).unwrap())
            .await;
        assert!(result.is_error());
        assert!(result.text().starts_with("Error: Invalid parameters for add:"));
    }

    #[tokio::test]
    async fn test_inactive_tool_reports_inactive() {
        let toolkit = Toolkit::new();
        toolkit.create_group("ops", "Deployment tools", false).unwrap();
        toolkit
            .register(
                ToolRegistration::sync(schema("deploy"), |_args| Ok::<_, String>("shipped"))
                    .in_group("ops"),
            )
            .unwrap();

        let call = ToolCall::new("d1", "deploy", json!({})).unwrap();
        let result = toolkit.call_tool(&call).await;
        assert_eq!(
            result.text(),
            "Error: Tool deploy is not active; activate one of its groups first"
        );

        toolkit.activate_group("ops").unwrap();
        assert_eq!(toolkit.call_tool(&call).await.text(), "shipped");
    }

    #[tokio::test]
    async fn test_streaming_tool_through_toolkit() {
        let toolkit = Toolkit::new();
        toolkit
            .register(ToolRegistration::streaming(schema("progress"), |_args, _ctx| {
                futures::stream::iter(vec![
                    Ok::<_, String>(ReturnValue::from("10%")),
                    Ok(ReturnValue::from(json!({"done": true}))),
                ])
            }))
            .unwrap();

        let result = toolkit
            .call_tool(&ToolCall::new("s1", "progress", json!({})).unwrap())
            .await;
        assert_eq!(result.text(), r#"{"done":true}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout_result() {
        let toolkit = Toolkit::builder()
            .call_timeout(Some(Duration::from_millis(50)))
            .build();
        toolkit.register(sleeper("slow")).unwrap();

        let result = toolkit
            .call_tool(&ToolCall::new("t1", "slow", json!({})).unwrap())
            .await;
        assert_eq!(result.text(), "Error: slow timed out after 50ms");

        let options = CallOptions {
            timeout: Some(Duration::from_secs(20)),
            ..CallOptions::default()
        };
        let result = toolkit
            .call_tool_with_options(&ToolCall::new("t2", "slow", json!({})).unwrap(), options)
            .await;
        assert_eq!(result.text(), "woke up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_resolves_pending_calls() {
        let toolkit = toolkit_with_add();
        toolkit.register(sleeper("slow")).unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let results = toolkit
            .call_tools_with_cancellation(
                vec![
                    ToolCall::new("fast", "add", json!({"a": 2, "b": 2})).unwrap(),
                    ToolCall::new("slow", "slow", json!({})).unwrap(),
                ],
                token,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(by_id(&results, "fast").text(), "4");
        assert_eq!(by_id(&results, "slow").text(), "Error: slow was cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_calls_keep_their_own_options() {
        let toolkit = Toolkit::builder()
            .call_timeout(Some(Duration::from_secs(60)))
            .build();
        toolkit.register(sleeper("slow")).unwrap();

        let stopped = CancellationToken::new();
        stopped.cancel();
        let calls = vec![
            (
                ToolCall::new("short", "slow", json!({})).unwrap(),
                CallOptions {
                    timeout: Some(Duration::from_millis(50)),
                    ..CallOptions::default()
                },
            ),
            (
                ToolCall::new("default", "slow", json!({})).unwrap(),
                CallOptions::default(),
            ),
            (
                ToolCall::new("stopped", "slow", json!({})).unwrap(),
                CallOptions {
                    cancellation_token: Some(stopped),
                    ..CallOptions::default()
                },
            ),
        ];

        let results = toolkit
            .call_tools_with_options(calls, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(by_id(&results, "short").text(), "Error: slow timed out after 50ms");
        assert_eq!(by_id(&results, "default").text(), "woke up");
        assert_eq!(by_id(&results, "stopped").text(), "Error: slow was cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_batch_cancels_calls() {
        let toolkit = Toolkit::new();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        toolkit
            .register(ToolRegistration::deferred(
                schema("watched"),
                move |_args, ctx: CallContext| {
                    let flag = flag.clone();
                    async move {
                        tokio::spawn(async move {
                            ctx.cancellation_token.cancelled().await;
                            flag.store(true, Ordering::SeqCst);
                        });
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok::<_, String>(())
                    }
                },
            ))
            .unwrap();

        let batch = toolkit.call_tools(vec![ToolCall::new("w1", "watched", json!({})).unwrap()]);
        assert!(tokio::time::timeout(Duration::from_millis(20), batch).await.is_err());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_remote_tools_are_routed() {
        let remote = FakeRemote::with_tools(vec![schema("echo"), schema("add")]);
        let toolkit = Toolkit::new();
        toolkit
            .add_mcp_client(Arc::new(McpClient::new("fake", remote.connector())))
            .await
            .unwrap();

        let result = toolkit
            .call_tool(&ToolCall::new("e1", "echo", json!({"message": "hello"})).unwrap())
            .await;
        assert_eq!(result.text(), "hello");
        assert_eq!(remote.calls()[0].0, "echo");
    }

    #[tokio::test]
    async fn test_local_shadows_remote_even_when_inactive() {
        let remote = FakeRemote::with_tools(vec![schema("echo"), schema("ping")]);
        let toolkit = Toolkit::new();
        toolkit.create_group("local", "", false).unwrap();
        toolkit
            .register(
                ToolRegistration::sync(schema("echo"), |_args| Ok::<_, String>("local echo"))
                    .in_group("local"),
            )
            .unwrap();
        toolkit
            .add_mcp_client(Arc::new(McpClient::new("fake", remote.connector())))
            .await
            .unwrap();

        let result = toolkit
            .call_tool(&ToolCall::new("e1", "echo", json!({})).unwrap())
            .await;
        assert!(result.is_error());
        assert!(remote.calls().is_empty());

        let all: Vec<String> = toolkit
            .tool_schemas(false)
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(all, vec!["echo", "ping"]);
        let active: Vec<String> = toolkit
            .tool_schemas(true)
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(active, vec!["ping"]);
    }

    #[tokio::test]
    async fn test_group_control_tool() {
        let toolkit = Toolkit::new();
        toolkit.create_group("ops", "Deployment tools", false).unwrap();
        toolkit.create_group("web", "Browsing tools", true).unwrap();
        toolkit.register_group_control_tool().unwrap();

        let control = toolkit
            .tool_schemas(true)
            .await
            .into_iter()
            .find(|s| s.name == group_control::GROUP_CONTROL_TOOL)
            .unwrap();
        assert!(control.input_schema.properties.contains_key("ops"));
        assert!(!control.input_schema.properties.contains_key("basic"));

        let result = toolkit
            .call_tool(
                &ToolCall::new(
                    "g1",
                    group_control::GROUP_CONTROL_TOOL,
                    json!({"ops": true, "web": false}),
                )
                .unwrap(),
            )
            .await;
        assert!(!result.is_error());
        assert_eq!(result.text(), "Active groups: basic, ops");

        let result = toolkit
            .call_tool(
                &ToolCall::new("g2", group_control::GROUP_CONTROL_TOOL, json!({"ops": "yes"}))
                    .unwrap(),
            )
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_group_control_keeps_default_group_and_applies_atomically() {
        let toolkit = Toolkit::new();
        toolkit.create_group("ops", "Deployment tools", false).unwrap();
        toolkit.register_group_control_tool().unwrap();

        let call = |id: &str, args: Value| {
            ToolCall::new(id, group_control::GROUP_CONTROL_TOOL, args).unwrap()
        };

        let result = toolkit.call_tool(&call("g1", json!({"basic": false}))).await;
        assert!(result.is_error());
        assert_eq!(toolkit.state().active_groups, vec!["basic"]);

        let result = toolkit
            .call_tool(&call("g2", json!({"ops": true, "ghost": true})))
            .await;
        assert!(result.is_error());
        assert!(result.text().contains("ghost"));
        assert_eq!(toolkit.state().active_groups, vec!["basic"]);

        let result = toolkit.call_tool(&call("g3", json!({"ops": true}))).await;
        assert_eq!(result.text(), "Active groups: basic, ops");
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let toolkit = Toolkit::new();
        toolkit.create_group("ops", "", false).unwrap();
        toolkit.activate_group("ops").unwrap();
        let saved = serde_json::to_string(&toolkit.state()).unwrap();

        let fresh = Toolkit::new();
        fresh.create_group("ops", "", false).unwrap();
        fresh.restore_state(&serde_json::from_str(&saved).unwrap());
        assert_eq!(fresh.state().active_groups, vec!["basic", "ops"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let first = FakeRemote::with_tools(vec![schema("echo")]);
        let second = FakeRemote::with_tools(vec![schema("ping")]);
        let toolkit = Toolkit::new();
        let client = Arc::new(McpClient::new("first", first.connector()));
        toolkit.add_mcp_client(client.clone()).await.unwrap();
        toolkit
            .add_mcp_client(Arc::new(McpClient::new("second", second.connector())))
            .await
            .unwrap();

        assert!(toolkit.remove_mcp_client("second").await.is_some());
        assert!(toolkit.remove_mcp_client("second").await.is_none());
        assert_eq!(second.closes(), 1);

        toolkit.shutdown().await;
        assert_eq!(first.closes(), 1);
        assert_eq!(client.state(), RemoteClientState::Closed);

        let result = toolkit
            .call_tool(&ToolCall::new("e1", "echo", json!({})).unwrap())
            .await;
        assert_eq!(result.text(), "Error: Unknown tool: echo");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_every_id_answered_once(delays in prop::collection::vec(0u64..5, 1..16)) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            let results = runtime.block_on(async {
                let toolkit = Toolkit::new();
                toolkit
                    .register(ToolRegistration::deferred(schema("nap"), |args, _ctx| async move {
                        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or_default();
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok::<_, String>(ms)
                    }))
                    .unwrap();

                let calls = delays
                    .iter()
                    .enumerate()
                    .map(|(i, ms)| {
                        let name = if i % 3 == 2 { "missing" } else { "nap" };
                        ToolCall::new(format!("call-{i}"), name, json!({"ms": ms})).unwrap()
                    })
                    .collect();
                toolkit.call_tools(calls).await
            });

            let mut got: Vec<String> = results.iter().map(|r| r.id().to_string()).collect();
            got.sort();
            let mut want: Vec<String> = (0..delays.len()).map(|i| format!("call-{i}")).collect();
            want.sort();
            prop_assert_eq!(got, want);
        }
    }
}
