use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool {0} is already registered")]
    DuplicateTool(String),

    #[error("Unknown tool group: {0}")]
    UnknownGroup(String),

    #[error("Tool group {0} already exists")]
    DuplicateGroup(String),

    #[error("Input schema of {tool_name} does not compile: {message}")]
    InvalidSchema { tool_name: String, message: String },
}

/// Why a name could not be resolved to a callable local tool.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("not registered")]
    NotFound,

    #[error("registered but none of its groups is active")]
    NotActive,
}
