pub mod backend;
pub mod cache;
pub mod client;
pub mod connection;
pub mod error;
pub mod filter;
pub mod listing;
#[cfg(test)]
pub mod test_servers;

pub use backend::{McpTransport, RmcpConnector};
pub use client::{McpClient, RemoteClientState};
pub use connection::{McpConnection, McpConnector};
pub use error::McpError;
pub use filter::ToolFilter;
pub use listing::{CatalogListing, SearchListing, ToolListing};
