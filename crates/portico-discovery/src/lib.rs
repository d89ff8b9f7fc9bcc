//! Network discovery of MCP servers.
//!
//! Expands address ranges into probe targets, detects MCP endpoints with a
//! two-phase probe, scores their authentication posture and runs whole
//! scans as cancellable background jobs.

pub mod cache;
pub mod cidr;
pub mod prober;
pub mod store;
pub mod supervisor;
pub mod targets;

pub use cache::{fingerprint, DiscoveredCache};
pub use cidr::{expand_cidr, MAX_RANGE_ADDRESSES};
pub use prober::{classify_adapter_route, classify_direct, ProbeOutcome, Prober};
pub use store::{InMemoryScanStore, ScanResultStore};
pub use supervisor::{ScanSupervisor, SupervisorConfig};
pub use targets::{generate_targets, self_addresses};
