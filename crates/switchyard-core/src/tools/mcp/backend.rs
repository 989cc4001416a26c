//! Connection seam implemented on top of the rmcp client.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_tools::{CallToolRequest, CallToolResponse, ContentBlock, InputSchema, ToolSchema};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{ChildStderr, Command};
use tracing::{debug, error, info};

use super::connection::{McpConnection, McpConnector};
use super::error::McpError;

/// How to reach an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransport {
    /// Spawn the server as a child process speaking over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Tcp {
        host: String,
        port: u16,
    },
    /// Streamable HTTP endpoint.
    Http {
        url: String,
    },
}

impl std::fmt::Display for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpTransport::Stdio { command, .. } => write!(f, "stdio:{command}"),
            McpTransport::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            McpTransport::Http { url } => write!(f, "{url}"),
        }
    }
}

pub struct RmcpConnector {
    server_name: String,
    transport: McpTransport,
}

impl RmcpConnector {
    pub fn new(server_name: impl Into<String>, transport: McpTransport) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
        }
    }

    fn connection_failed(&self, message: impl Into<String>) -> McpError {
        McpError::ConnectionFailed {
            server_name: self.server_name.clone(),
            message: message.into(),
        }
    }

    fn forward_stderr(&self, stderr: ChildStderr) {
        let server_name = self.server_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "mcp_server", "[{}] {}", server_name, line.trim_end());
            }
        });
    }

    async fn serve(&self) -> Result<RunningService<RoleClient, ()>, McpError> {
        let served = match &self.transport {
            McpTransport::Stdio { command, args } => {
                let (process, stderr) =
                    TokioChildProcess::builder(Command::new(command).configure(|cmd| {
                        cmd.args(args);
                    }))
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        self.connection_failed(format!("Failed to spawn MCP process: {e}"))
                    })?;
                if let Some(stderr) = stderr {
                    self.forward_stderr(stderr);
                }
                ().serve(process).await
            }
            McpTransport::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| self.connection_failed(e.to_string()))?;
                ().serve(stream).await
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().serve(transport).await
            }
        };

        served.map_err(|e| {
            error!(target: "mcp_client", server = %self.server_name, "Failed to serve MCP: {e}");
            self.connection_failed(format!("Failed to serve MCP over {}: {e}", self.transport))
        })
    }
}

#[async_trait]
impl McpConnector for RmcpConnector {
    async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError> {
        info!(target: "mcp_client", server = %self.server_name, transport = %self.transport, "Connecting to MCP server");
        let service = self.serve().await?;
        debug!(target: "mcp_client", server = %self.server_name, peer = ?service.peer_info(), "MCP handshake complete");

        Ok(Arc::new(RmcpConnection {
            server_name: self.server_name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }))
    }
}

/// Requests use a cloned [`Peer`]; only `close` takes the service handle.
pub struct RmcpConnection {
    server_name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpConnection {
    fn transport_error(&self, message: impl Into<String>) -> McpError {
        McpError::Transport {
            server_name: self.server_name.clone(),
            message: message.into(),
        }
    }

    fn closed(&self) -> McpError {
        McpError::ClientClosed {
            server_name: self.server_name.clone(),
        }
    }

    fn open_peer(&self) -> Result<&Peer<RoleClient>, McpError> {
        let open = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if open { Ok(&self.peer) } else { Err(self.closed()) }
    }
}

#[async_trait]
impl McpConnection for RmcpConnection {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        let tools = self
            .open_peer()?
            .list_all_tools()
            .await
            .map_err(|e| McpError::ListToolsFailed {
                server_name: self.server_name.clone(),
                message: e.to_string(),
            })?;
        Ok(tools.iter().map(tool_to_schema).collect())
    }

    async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResponse, McpError> {
        let result = self
            .open_peer()?
            .call_tool(CallToolRequestParam {
                name: request.name.into(),
                arguments: Some(request.arguments),
            })
            .await
            .map_err(|e| self.transport_error(e.to_string()))?;
        response_from_result(&result).map_err(|e| self.transport_error(e.to_string()))
    }

    async fn close(&self) -> Result<(), McpError> {
        let service = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| self.transport_error(e.to_string()))?;
        }
        Ok(())
    }
}

fn tool_to_schema(tool: &Tool) -> ToolSchema {
    let input_schema = InputSchema::from_value(&Value::Object((*tool.input_schema).clone()));
    let description = match tool.description.as_deref() {
        Some(desc) if !desc.is_empty() => desc.to_string(),
        _ => tool.name.to_string(),
    };
    ToolSchema::new(tool.name.to_string(), description, input_schema)
}

fn response_from_result(result: &CallToolResult) -> serde_json::Result<CallToolResponse> {
    let wire = serde_json::to_value(result)?;
    let content = wire
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(content_block).collect())
        .unwrap_or_default();

    Ok(CallToolResponse {
        content,
        is_error: wire
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        structured_content: wire
            .get("structuredContent")
            .and_then(Value::as_object)
            .cloned(),
    })
}

fn content_block(item: &Value) -> ContentBlock {
    let parsed = match item.get("type").and_then(Value::as_str) {
        Some("text" | "image" | "audio") => serde_json::from_value(item.clone()).ok(),
        Some("resource") => item.get("resource").and_then(|resource| {
            Some(ContentBlock::Resource {
                uri: resource.get("uri")?.as_str()?.to_string(),
                mime_type: resource
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(String::from),
                text: resource.get("text").and_then(Value::as_str).map(String::from),
            })
        }),
        _ => None,
    };
    parsed.unwrap_or_else(|| ContentBlock::text(item.to_string()))
}
