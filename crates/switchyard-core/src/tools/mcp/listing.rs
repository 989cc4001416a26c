use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use switchyard_tools::{CallToolRequest, CallToolResponse, InputSchema, ToolSchema};
use tracing::{debug, warn};

use super::cache::{ToolCache, ToolMap};
use super::connection::McpConnection;
use super::error::McpError;
use super::filter::ToolFilter;

pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SEARCH_TOOL: &str = "search_tools";

/// What a listing strategy may touch while it runs.
pub struct ListingContext<'a> {
    pub server_name: &'a str,
    pub connection: &'a dyn McpConnection,
    pub catalog: &'a ToolCache,
    pub discovered: &'a ToolCache,
    pub filter: &'a ToolFilter,
}

/// How a client answers `list_tools`.
#[async_trait]
pub trait ToolListing: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Work done once during `initialize`, after the handshake.
    async fn prime(&self, ctx: ListingContext<'_>) -> Result<(), McpError>;

    async fn list_tools(&self, ctx: ListingContext<'_>) -> Result<Vec<ToolSchema>, McpError>;
}

/// Fetch the full catalog once and serve it from the cache.
#[derive(Debug, Clone)]
pub struct CatalogListing {
    list_timeout: Duration,
}

impl Default for CatalogListing {
    fn default() -> Self {
        Self {
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }
}

impl CatalogListing {
    pub fn new(list_timeout: Duration) -> Self {
        Self { list_timeout }
    }

    async fn fetch(&self, ctx: &ListingContext<'_>) -> Result<Vec<ToolSchema>, McpError> {
        let tools = tokio::time::timeout(self.list_timeout, ctx.connection.list_tools())
            .await
            .map_err(|_| McpError::ListToolsTimeout {
                server_name: ctx.server_name.to_string(),
            })??;

        let total = tools.len();
        let tools: ToolMap = tools
            .into_iter()
            .filter(|tool| ctx.filter.should_include(&tool.name))
            .map(|tool| (tool.name.clone(), tool))
            .collect();
        debug!(
            target: "mcp_client",
            server = ctx.server_name,
            total,
            kept = tools.len(),
            "Fetched tool catalog"
        );

        ctx.catalog.replace(tools);
        Ok(ctx.catalog.schemas())
    }
}

#[async_trait]
impl ToolListing for CatalogListing {
    fn kind(&self) -> &'static str {
        "catalog"
    }

    async fn prime(&self, ctx: ListingContext<'_>) -> Result<(), McpError> {
        self.fetch(&ctx).await.map(|_| ())
    }

    async fn list_tools(&self, ctx: ListingContext<'_>) -> Result<Vec<ToolSchema>, McpError> {
        if ctx.catalog.is_populated() {
            return Ok(ctx.catalog.schemas());
        }
        self.fetch(&ctx).await
    }
}

/// Ask a remote search tool for the tools relevant to a fixed query instead
/// of materializing the catalog.
#[derive(Debug, Clone)]
pub struct SearchListing {
    query: String,
    top_k: Option<usize>,
    search_tool: String,
    list_timeout: Duration,
}

impl SearchListing {
    pub fn new(query: impl Into<String>, top_k: Option<usize>) -> Self {
        Self {
            query: query.into(),
            top_k,
            search_tool: DEFAULT_SEARCH_TOOL.to_string(),
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_list_timeout(mut self, list_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self
    }

    pub fn with_search_tool(mut self, name: impl Into<String>) -> Self {
        self.search_tool = name.into();
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn top_k(&self) -> Option<usize> {
        self.top_k
    }

    fn request(&self) -> CallToolRequest {
        let mut arguments = Map::new();
        arguments.insert("query".to_string(), Value::String(self.query.clone()));
        if let Some(top_k) = self.top_k {
            arguments.insert("topK".to_string(), Value::from(top_k));
        }
        CallToolRequest {
            name: self.search_tool.clone(),
            arguments,
        }
    }
}

#[async_trait]
impl ToolListing for SearchListing {
    fn kind(&self) -> &'static str {
        "search"
    }

    async fn prime(&self, _ctx: ListingContext<'_>) -> Result<(), McpError> {
        Ok(())
    }

    async fn list_tools(&self, ctx: ListingContext<'_>) -> Result<Vec<ToolSchema>, McpError> {
        let pending = ctx.connection.call_tool(self.request());
        let response = tokio::time::timeout(self.list_timeout, pending)
            .await
            .map_err(|_| McpError::ListToolsTimeout {
                server_name: ctx.server_name.to_string(),
            })??;

        if response.is_error {
            let message = response
                .content
                .iter()
                .filter_map(|b| b.as_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(McpError::SearchFailed {
                server_name: ctx.server_name.to_string(),
                message,
            });
        }

        let mut tools: Vec<ToolSchema> = parse_search_response(&response)
            .ok_or_else(|| McpError::SearchFailed {
                server_name: ctx.server_name.to_string(),
                message: "response carries no tool list".to_string(),
            })?
            .into_iter()
            .filter(|tool| ctx.filter.should_include(&tool.name))
            .collect();
        if let Some(top_k) = self.top_k {
            tools.truncate(top_k);
        }

        debug!(
            target: "mcp_client",
            server = ctx.server_name,
            query = %self.query,
            found = tools.len(),
            "Search listing returned tools"
        );

        ctx.discovered.replace(
            tools
                .iter()
                .map(|tool| (tool.name.clone(), tool.clone()))
                .collect(),
        );
        Ok(tools)
    }
}

#[derive(Deserialize)]
struct SearchHit {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "inputSchema", alias = "parameters")]
    input_schema: Option<Value>,
}

impl From<SearchHit> for ToolSchema {
    fn from(hit: SearchHit) -> Self {
        let input_schema = hit
            .input_schema
            .as_ref()
            .map(InputSchema::from_value)
            .unwrap_or_default();
        let description = hit.description.unwrap_or_else(|| hit.name.clone());
        ToolSchema::new(hit.name, description, input_schema)
    }
}

/// Tools from `structuredContent.tools`, else from the first text block
/// holding either `{"tools": [...]}` or a bare array.
fn parse_search_response(response: &CallToolResponse) -> Option<Vec<ToolSchema>> {
    if let Some(tools) = response
        .structured_content
        .as_ref()
        .and_then(|s| s.get("tools"))
        .and_then(Value::as_array)
    {
        return Some(parse_hits(tools));
    }

    response
        .content
        .iter()
        .filter_map(|block| block.as_text())
        .filter_map(|text| serde_json::from_str::<Value>(text).ok())
        .find_map(|value| match value {
            Value::Array(items) => Some(parse_hits(&items)),
            Value::Object(obj) => obj.get("tools").and_then(Value::as_array).map(|t| parse_hits(t)),
            _ => None,
        })
}

fn parse_hits(items: &[Value]) -> Vec<ToolSchema> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<SearchHit>(item.clone()) {
            Ok(hit) => Some(hit.into()),
            Err(e) => {
                warn!(target: "mcp_client", "Skipping malformed search hit: {e}");
                None
            }
        })
        .collect()
}
