use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use switchyard_tools::{CallToolRequest, ToolCall, ToolError, ToolResult, ToolSchema};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{McpTransport, RmcpConnector};
use super::cache::ToolCache;
use super::connection::{McpConnection, McpConnector};
use super::error::McpError;
use super::filter::ToolFilter;
use super::listing::{CatalogListing, ListingContext, SearchListing, ToolListing};

/// Lifecycle of a [`McpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteClientState {
    Created,
    Initializing,
    Ready,
    Closed,
}

/// Client for the tools of one remote MCP server.
pub struct McpClient {
    server_name: String,
    connector: Arc<dyn McpConnector>,
    listing: Arc<dyn ToolListing>,
    tool_filter: ToolFilter,
    call_timeout: Option<Duration>,
    state: RwLock<RemoteClientState>,
    connection: RwLock<Option<Arc<dyn McpConnection>>>,
    lifecycle: Mutex<()>,
    catalog: ToolCache,
    discovered: ToolCache,
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .field("listing", &self.listing.kind())
            .field("state", &self.state())
            .field("cached_tools", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, connector: Arc<dyn McpConnector>) -> Self {
        Self {
            server_name: server_name.into(),
            connector,
            listing: Arc::new(CatalogListing::default()),
            tool_filter: ToolFilter::All,
            call_timeout: None,
            state: RwLock::new(RemoteClientState::Created),
            connection: RwLock::new(None),
            lifecycle: Mutex::new(()),
            catalog: ToolCache::new(),
            discovered: ToolCache::new(),
        }
    }

    /// Client backed by the rmcp transport stack.
    pub fn connect_to(server_name: impl Into<String>, transport: McpTransport) -> Self {
        let server_name = server_name.into();
        let connector = Arc::new(RmcpConnector::new(server_name.clone(), transport));
        Self::new(server_name, connector)
    }

    pub fn with_listing(mut self, listing: Arc<dyn ToolListing>) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_search(self, query: impl Into<String>, top_k: Option<usize>) -> Self {
        self.with_listing(Arc::new(SearchListing::new(query, top_k)))
    }

    pub fn with_tool_filter(mut self, filter: ToolFilter) -> Self {
        self.tool_filter = filter;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn state(&self) -> RemoteClientState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RemoteClientState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn closed(&self) -> McpError {
        McpError::ClientClosed {
            server_name: self.server_name.clone(),
        }
    }

    /// Connect and prime the listing strategy. A no-op once ready.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            RemoteClientState::Ready => return Ok(()),
            RemoteClientState::Closed => return Err(self.closed()),
            RemoteClientState::Created | RemoteClientState::Initializing => {}
        }

        self.set_state(RemoteClientState::Initializing);
        info!(target: "mcp_client", server = %self.server_name, listing = self.listing.kind(), "Initializing MCP client");

        let connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => return Err(self.initialization_failed(&e)),
        };

        let primed = self
            .listing
            .prime(ListingContext {
                server_name: &self.server_name,
                connection: connection.as_ref(),
                catalog: &self.catalog,
                discovered: &self.discovered,
                filter: &self.tool_filter,
            })
            .await;
        if let Err(e) = primed {
            if let Err(close_err) = connection.close().await {
                debug!(target: "mcp_client", server = %self.server_name, "Error closing half-open connection: {close_err}");
            }
            self.catalog.clear();
            return Err(self.initialization_failed(&e));
        }

        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(connection);
        self.set_state(RemoteClientState::Ready);
        info!(
            target: "mcp_client",
            server = %self.server_name,
            tools = self.catalog.len(),
            "MCP client ready"
        );
        Ok(())
    }

    fn initialization_failed(&self, cause: &McpError) -> McpError {
        self.set_state(RemoteClientState::Created);
        warn!(target: "mcp_client", server = %self.server_name, "MCP initialization failed: {cause}");
        McpError::Initialization {
            server_name: self.server_name.clone(),
            message: cause.to_string(),
        }
    }

    fn ready_connection(&self) -> Result<Arc<dyn McpConnection>, McpError> {
        match self.state() {
            RemoteClientState::Ready => {}
            RemoteClientState::Closed => return Err(self.closed()),
            RemoteClientState::Created | RemoteClientState::Initializing => {
                return Err(McpError::NotInitialized {
                    server_name: self.server_name.clone(),
                });
            }
        }
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| self.closed())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        let connection = self.ready_connection()?;
        self.listing
            .list_tools(ListingContext {
                server_name: &self.server_name,
                connection: connection.as_ref(),
                catalog: &self.catalog,
                discovered: &self.discovered,
                filter: &self.tool_filter,
            })
            .await
    }

    /// Whether calls for `name` should be routed here.
    pub fn has_tool(&self, name: &str) -> bool {
        self.state() == RemoteClientState::Ready
            && (self.catalog.contains(name) || self.discovered.contains(name))
    }

    /// Cached catalog, empty unless ready with the catalog strategy.
    pub fn cached_schemas(&self) -> Vec<ToolSchema> {
        self.catalog.schemas()
    }

    /// Forward a call. Transport failures come back as error results; only
    /// lifecycle problems are `Err`.
    pub async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, McpError> {
        let connection = self.ready_connection()?;
        if !self.tool_filter.should_include(call.name()) {
            return Ok(ToolResult::error(call, &ToolError::unknown_tool(call.name())));
        }

        let pending = connection.call_tool(CallToolRequest {
            name: call.name().to_string(),
            arguments: call.arguments().clone(),
        });
        let response = match self.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(target: "mcp_client", server = %self.server_name, tool = call.name(), "Remote call timed out");
                    return Ok(ToolResult::error(
                        call,
                        &ToolError::timeout(call.name(), timeout),
                    ));
                }
            },
            None => pending.await,
        };

        match response {
            Ok(response) => Ok(response.into_result(call)),
            Err(e) => {
                warn!(target: "mcp_client", server = %self.server_name, tool = call.name(), "Remote call failed: {e}");
                Ok(ToolResult::error(
                    call,
                    &ToolError::transport(call.name(), e.to_string()),
                ))
            }
        }
    }

    /// Release the connection and drop cached tools. Idempotent.
    pub async fn close(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == RemoteClientState::Closed {
            return Ok(());
        }

        self.set_state(RemoteClientState::Closed);
        let connection = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.catalog.clear();
        self.discovered.clear();

        if let Some(connection) = connection
            && let Err(e) = connection.close().await
        {
            warn!(target: "mcp_client", server = %self.server_name, "Error closing MCP connection: {e}");
        }
        info!(target: "mcp_client", server = %self.server_name, "MCP client closed");
        Ok(())
    }
}
