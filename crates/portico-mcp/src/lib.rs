//! MCP wire types, a streamable-HTTP client and capability discovery.

pub mod auth;
pub mod client;
pub mod discovery;
pub mod protocol;

pub use auth::ApplyAuth;
pub use client::McpHttpClient;
pub use discovery::{CapabilityDiscoverer, HttpCapabilityDiscoverer};
