//! Adapter provisioning for the Portico gateway.
//!
//! Catalog and adapter stores, sidecar metadata resolution, the sidecar
//! runtime contract with a local process implementation, and the
//! provisioning and lifecycle services built on top of them.

pub mod catalog;
pub mod lifecycle;
pub mod provisioner;
pub mod resolver;
pub mod runtime;
pub mod store;

pub use catalog::{load_catalog_file, CatalogStore, InMemoryCatalogStore};
pub use lifecycle::{AdapterLifecycle, DeleteOutcome, RestoreOutcome};
pub use provisioner::{AdapterProvisioner, CreateAdapterRequest};
pub use resolver::{default_launch_spec, resolve_sidecar_spec};
pub use runtime::{
    PortPool, ProcessRuntimeConfig, ProcessSidecarRuntime, SidecarDeployment, SidecarRuntime,
};
pub use store::{
    validate_adapter_name, AdapterStore, FileAdapterStore, InMemoryAdapterStore,
    MAX_ADAPTER_NAME_LEN,
};
