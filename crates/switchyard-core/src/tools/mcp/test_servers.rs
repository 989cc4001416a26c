//! MCP server used by the rmcp round-trip tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rmcp::handler::server::{router::tool::ToolRouter, tool::Parameters};
use rmcp::schemars;
use rmcp::service::ServiceExt;
use rmcp::{
    ErrorData, ServerHandler,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WeatherMcpService {
    call_count: Arc<AtomicU32>,
    tool_router: ToolRouter<WeatherMcpService>,
}

impl WeatherMcpService {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(AtomicU32::new(0)),
            tool_router: Self::tool_router(),
        }
    }

    fn bump(&self) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct EchoRequest {
    #[schemars(description = "Message to echo back")]
    pub message: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct AddRequest {
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "topK")]
    pub top_k: Option<usize>,
}

#[tool_router]
impl WeatherMcpService {
    #[tool(description = "Echo back the input message")]
    async fn echo(
        &self,
        Parameters(EchoRequest { message }): Parameters<EchoRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.bump();
        Ok(CallToolResult::success(vec![Content::text(message)]))
    }

    #[tool(description = "Add two numbers together")]
    async fn add(
        &self,
        Parameters(AddRequest { a, b }): Parameters<AddRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.bump();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}",
            a + b
        ))]))
    }

    #[tool(description = "Find tools relevant to a query")]
    async fn search_tools(
        &self,
        Parameters(SearchRequest { query, top_k }): Parameters<SearchRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.bump();
        let hits: Vec<_> = ["forecast", "radar", "alerts"]
            .iter()
            .take(top_k.unwrap_or(usize::MAX))
            .map(|name| {
                json!({
                    "name": format!("{query}_{name}"),
                    "description": format!("{name} for a {query} question"),
                    "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}}
                })
            })
            .collect();
        Ok(CallToolResult::success(vec![Content::text(
            json!({ "tools": hits }).to_string(),
        )]))
    }

    #[tool(description = "Take a long time to answer")]
    async fn slow(&self) -> Result<CallToolResult, ErrorData> {
        self.bump();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(CallToolResult::success(vec![Content::text("finally")]))
    }

    #[tool(description = "Always fails")]
    async fn explode(&self) -> Result<CallToolResult, ErrorData> {
        self.bump();
        Ok(CallToolResult::error(vec![Content::text("kaboom")]))
    }
}

#[tool_handler]
impl ServerHandler for WeatherMcpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: None,
            ..Default::default()
        }
    }
}

/// Serve [`WeatherMcpService`] on an ephemeral local port.
pub async fn start_tcp_server() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let service = WeatherMcpService::new();

    let task = tokio::spawn(async move {
        while let Ok((stream, addr)) = listener.accept().await {
            debug!("Accepted connection from {addr}");
            let service = service.clone();
            tokio::spawn(async move {
                if let Ok(running) = service.serve(stream).await {
                    let _ = running.waiting().await;
                }
            });
        }
    });

    (port, task)
}
