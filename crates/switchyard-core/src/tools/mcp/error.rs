use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpError {
    #[error("Cannot connect to {server_name}: {message}")]
    ConnectionFailed {
        server_name: String,
        message: String,
    },

    #[error("Failed to initialize MCP client {server_name}: {message}")]
    Initialization {
        server_name: String,
        message: String,
    },

    #[error("MCP client {server_name} is closed")]
    ClientClosed { server_name: String },

    #[error("MCP client {server_name} is not initialized")]
    NotInitialized { server_name: String },

    #[error("Failed to list tools from {server_name}: {message}")]
    ListToolsFailed {
        server_name: String,
        message: String,
    },

    #[error("Timeout listing tools from {server_name}")]
    ListToolsTimeout { server_name: String },

    #[error("Tool search on {server_name} failed: {message}")]
    SearchFailed {
        server_name: String,
        message: String,
    },

    #[error("Transport error talking to {server_name}: {message}")]
    Transport {
        server_name: String,
        message: String,
    },
}
