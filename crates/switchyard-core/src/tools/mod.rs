pub mod convert;
pub mod error;
pub mod group_control;
pub mod handler;
pub mod local_tool;
pub mod mcp;
pub mod registry;
pub mod toolkit;

pub use convert::{ConversionRule, ResultConverter, ReturnValue};
pub use error::{RegistryError, ResolveError};
pub use handler::{AsyncHandler, CallContext, StreamHandler, SyncHandler, ToolHandler, WorkerPool};
pub use local_tool::{LocalTool, LocalToolErased};
pub use mcp::{McpClient, McpError, McpTransport, ToolFilter};
pub use registry::{ActivationGroup, DEFAULT_GROUP, ResolvedTool, ToolRegistration, ToolRegistry};
pub use toolkit::{CallOptions, Toolkit, ToolkitBuilder, ToolkitState};
