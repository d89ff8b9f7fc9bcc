//! Core types and error definitions for the Portico MCP gateway.
//!
//! This crate provides the data model shared by discovery, provisioning and
//! the HTTP surface.
//!
//! # Main types
//!
//! - [`PorticoError`]: Unified error enum for all Portico subsystems.
//! - [`PorticoResult`]: Convenience alias for `Result<T, PorticoError>`.
//! - [`ScanConfig`] / [`ScanJob`]: A network scan request and its lifecycle.
//! - [`DiscoveredServer`]: An MCP endpoint found by a scan, with its [`AuthPosture`].
//! - [`McpServer`]: A catalog entry, with its [`TransportRequirement`].
//! - [`AdapterResource`]: A provisioned adapter and its [`AdapterBackend`].
//! - [`CapabilitySnapshot`]: Tools, resources and prompts a server exposes.

/// Adapter records, sidecar specs and auth policies.
pub mod adapter;
/// Capability snapshots.
pub mod capability;
/// Catalog entries.
pub mod catalog;
/// Duration string parsing.
pub mod duration;
/// Error types.
pub mod error;
/// Scan and discovery types.
pub mod scan;

pub use adapter::{
    AdapterBackend, AdapterResource, AdapterUpdate, ApiKeyLocation, AuthPolicy, EnvVar,
    RuntimeFamily, SidecarSpec,
};
pub use capability::{
    CapabilitySnapshot, PromptArgument, PromptDescriptor, ResourceDescriptor, ServerIdentity,
    ToolDescriptor,
};
pub use catalog::{
    McpServer, Package, PackageEnvVar, PackageTransport, PackageTransportKind,
    TransportRequirement,
};
pub use duration::parse_duration;
pub use error::{PorticoError, PorticoResult};
pub use scan::{
    AuthPosture, AuthType, ConnectionKind, DiscoveredServer, PortSpec, ScanConfig, ScanJob,
    ScanStatus, ServerHealth, ServerProtocol, VulnerabilityTier,
};
