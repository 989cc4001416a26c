//! In-process fakes for the MCP connection seam.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_tools::{CallToolRequest, CallToolResponse, ContentBlock, ToolSchema};

use crate::tools::mcp::connection::{McpConnection, McpConnector};
use crate::tools::mcp::error::McpError;
use crate::tools::mcp::listing::DEFAULT_SEARCH_TOOL;

#[derive(Default)]
struct FakeState {
    tools: Mutex<Vec<ToolSchema>>,
    handshakes: AtomicUsize,
    list_count: AtomicUsize,
    closes: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    fail_handshake: AtomicBool,
    fail_calls: AtomicBool,
    search_response: Mutex<Option<CallToolResponse>>,
    handshake_delay: Mutex<Option<Duration>>,
    list_delay: Mutex<Option<Duration>>,
    call_delay: Mutex<Option<Duration>>,
}

/// A scripted remote tool server that records what it was asked.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<FakeState>,
}

impl FakeRemote {
    pub fn with_tools(tools: Vec<ToolSchema>) -> Self {
        let remote = Self::default();
        *remote.state.tools.lock().unwrap() = tools;
        remote
    }

    pub fn connector(&self) -> Arc<dyn McpConnector> {
        Arc::new(FakeConnector {
            remote: self.clone(),
        })
    }

    pub fn connection(&self) -> Arc<dyn McpConnection> {
        Arc::new(FakeConnection {
            remote: self.clone(),
        })
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.state.list_count.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn fail_handshakes(&self, fail: bool) {
        self.state.fail_handshake.store(fail, Ordering::SeqCst);
    }

    pub fn fail_calls(&self, fail: bool) {
        self.state.fail_calls.store(fail, Ordering::SeqCst);
    }

    pub fn set_search_response(&self, response: CallToolResponse) {
        *self.state.search_response.lock().unwrap() = Some(response);
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.state.handshake_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.state.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.state.call_delay.lock().unwrap() = Some(delay);
    }

    fn delay(slot: &Mutex<Option<Duration>>) -> Option<Duration> {
        *slot.lock().unwrap()
    }
}

struct FakeConnector {
    remote: FakeRemote,
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError> {
        let state = &self.remote.state;
        state.handshakes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = FakeRemote::delay(&state.handshake_delay) {
            tokio::time::sleep(delay).await;
        }
        if state.fail_handshake.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionFailed {
                server_name: "fake".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.remote.connection())
    }
}

struct FakeConnection {
    remote: FakeRemote,
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        let state = &self.remote.state;
        state.list_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = FakeRemote::delay(&state.list_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(state.tools.lock().unwrap().clone())
    }

    async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResponse, McpError> {
        let CallToolRequest { name, arguments } = request;
        let name = name.as_str();
        let state = &self.remote.state;
        state
            .calls
            .lock()
            .unwrap()
            .push((name.to_string(), Value::Object(arguments.clone())));
        if let Some(delay) = FakeRemote::delay(&state.call_delay) {
            tokio::time::sleep(delay).await;
        }
        if state.fail_calls.load(Ordering::SeqCst) {
            return Err(McpError::Transport {
                server_name: "fake".to_string(),
                message: "connection reset by peer".to_string(),
            });
        }

        if name == DEFAULT_SEARCH_TOOL
            && let Some(response) = state.search_response.lock().unwrap().clone()
        {
            return Ok(response);
        }

        let known = state.tools.lock().unwrap().iter().any(|t| t.name == name);
        if !known {
            return Ok(CallToolResponse {
                content: vec![ContentBlock::text(format!("Unknown tool: {name}"))],
                is_error: true,
                structured_content: None,
            });
        }

        let text = match name {
            "add" => {
                let a = arguments.get("a").and_then(Value::as_f64).unwrap_or_default();
                let b = arguments.get("b").and_then(Value::as_f64).unwrap_or_default();
                format!("{}", a + b)
            }
            _ => arguments
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(arguments.clone()).to_string(), String::from),
        };
        Ok(CallToolResponse::text(text))
    }

    async fn close(&self) -> Result<(), McpError> {
        self.remote.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
