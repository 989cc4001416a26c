use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::mcp::listing::{CatalogListing, DEFAULT_LIST_TIMEOUT, DEFAULT_SEARCH_TOOL, SearchListing};
use crate::tools::mcp::{McpClient, McpTransport, ToolFilter};

pub const DEFAULT_MAX_BLOCKING_CALLS: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level toolkit configuration, usually loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolkitConfig {
    #[serde(default = "default_max_blocking_calls")]
    pub max_blocking_calls: usize,
    /// Default deadline for every call, in seconds.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_max_blocking_calls() -> usize {
    DEFAULT_MAX_BLOCKING_CALLS
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            max_blocking_calls: DEFAULT_MAX_BLOCKING_CALLS,
            call_timeout_secs: None,
            groups: Vec::new(),
            mcp_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct McpServerConfig {
    pub server_name: String,
    pub transport: McpTransport,
    #[serde(default)]
    pub tool_filter: ToolFilter,
    /// Use search listing instead of fetching the whole catalog.
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default)]
    pub list_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchConfig {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl ToolkitConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_blocking_calls == 0 {
            return Err(ConfigError::Invalid(
                "max_blocking_calls must be at least 1".to_string(),
            ));
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if !groups.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "group {} is declared twice",
                    group.name
                )));
            }
        }

        let mut servers = HashSet::new();
        for server in &self.mcp_servers {
            if !servers.insert(server.server_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "MCP server {} is declared twice",
                    server.server_name
                )));
            }
            if server.search.as_ref().and_then(|s| s.top_k) == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "search.top_k for {} must be at least 1",
                    server.server_name
                )));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

impl McpServerConfig {
    pub fn list_timeout(&self) -> Duration {
        self.list_timeout_secs
            .map_or(DEFAULT_LIST_TIMEOUT, Duration::from_secs)
    }

    /// Client for this server, not yet initialized.
    pub fn build_client(&self) -> McpClient {
        let mut client = McpClient::connect_to(&self.server_name, self.transport.clone())
            .with_tool_filter(self.tool_filter.clone());

        client = match &self.search {
            Some(search) => {
                let tool_name = search.tool_name.as_deref().unwrap_or(DEFAULT_SEARCH_TOOL);
                client.with_listing(Arc::new(
                    SearchListing::new(&search.query, search.top_k)
                        .with_search_tool(tool_name)
                        .with_list_timeout(self.list_timeout()),
                ))
            }
            None => client.with_listing(Arc::new(CatalogListing::new(self.list_timeout()))),
        };

        if let Some(secs) = self.call_timeout_secs {
            client = client.with_call_timeout(Duration::from_secs(secs));
        }
        client
    }
}
