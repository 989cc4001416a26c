pub mod error;
pub mod result;
pub mod schema;

pub use error::{ToolCallError, ToolError};
pub use result::{CallToolRequest, CallToolResponse, ContentBlock, ToolResult};
pub use schema::{InputSchema, ToolCall, ToolSchema};
