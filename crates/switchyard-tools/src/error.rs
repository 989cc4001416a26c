use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single tool call.
///
/// Every variant is reported back to the model as an error result; none of
/// them aborts the surrounding batch.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool {name} is not active; activate one of its groups first")]
    InactiveTool { name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParams { tool_name: String, message: String },

    #[error("{tool_name} failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error("Transport error calling {tool_name}: {message}")]
    Transport { tool_name: String, message: String },

    #[error("{tool_name} was cancelled")]
    Cancelled { tool_name: String },

    #[error("{tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Unexpected error: {message}")]
    InternalError { message: String },
}

impl ToolError {
    pub fn unknown_tool<T: Into<String>>(name: T) -> Self {
        ToolError::UnknownTool { name: name.into() }
    }

    pub fn inactive_tool<T: Into<String>>(name: T) -> Self {
        ToolError::InactiveTool { name: name.into() }
    }

    pub fn execution<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_params<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::InvalidParams {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn transport<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Transport {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn cancelled<T: Into<String>>(tool_name: T) -> Self {
        ToolError::Cancelled {
            tool_name: tool_name.into(),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        ToolError::InternalError {
            message: message.into(),
        }
    }

    pub fn timeout<T: Into<String>>(tool_name: T, timeout: std::time::Duration) -> Self {
        ToolError::Timeout {
            tool_name: tool_name.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Rejection of a malformed tool call at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Tool call id must not be empty")]
    EmptyId,

    #[error("Tool name must not be empty")]
    EmptyName,

    #[error("Arguments for {tool_name} must be a JSON object, got {found}")]
    NotAnObject { tool_name: String, found: String },

    #[error("Arguments for {tool_name} are not valid JSON: {message}")]
    MalformedArguments { tool_name: String, message: String },
}
