use thiserror::Error;

use crate::config::ConfigError;
use crate::tools::{McpError, RegistryError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tool(#[from] switchyard_tools::ToolError),
    #[error(transparent)]
    ToolCall(#[from] switchyard_tools::ToolCallError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
