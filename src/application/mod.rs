//! Application Layer
//!
//! Use cases orchestrating the domain through its ports.

pub mod admission;
pub mod discovery_service;
pub mod errors;
pub mod proxy_service;

pub use admission::AdmissionController;
pub use discovery_service::{DiscoveryService, RefreshReport};
pub use errors::ProxyError;
pub use proxy_service::{
    ConnectionLease, Endpoint, ForwardRequest, ProxyBody, ProxyResponse, ProxyService, RefreshMode,
};
