//! inference-batcher Library
//!
//! Load-balancing proxy for OpenAI-compatible text inference servers.
//! Exposes the components for the binary and for integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::HttpServer;
pub use adapters::outbound::{HttpModelProber, InMemoryUpstreamRegistry};
pub use application::{AdmissionController, DiscoveryService, ProxyError, ProxyService, RefreshMode};
pub use config::{load_config, parse_upstreams, Config, ConfigError, UpstreamsError};
pub use domain::entities::{ModelList, Upstream};
pub use domain::ports::{ModelProber, UpstreamRegistry};
pub use domain::services::LoadBalancer;
pub use domain::value_objects::{UpstreamId, UpstreamUrl, UrlError};
pub use infrastructure::{shutdown_signal, ShutdownController};
