use std::sync::Arc;

use async_trait::async_trait;
use switchyard_tools::{CallToolRequest, CallToolResponse, ToolSchema};

use super::error::McpError;

/// Performs the protocol handshake with one remote endpoint.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError>;
}

/// An established session with a remote tool server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    /// Full catalog, following pagination.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError>;

    async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResponse, McpError>;

    async fn close(&self) -> Result<(), McpError>;
}
