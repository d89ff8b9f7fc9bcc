//! HTTP surface of the Portico gateway.
//!
//! Exposes scan control, the discovered-server cache, adapter CRUD and
//! registration of discovered servers as adapters.

pub mod adapters;
pub mod error;
pub mod middleware;
pub mod scan;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use middleware::{AuthConfig, Creator};
pub use server::{AppState, GatewayServer};
