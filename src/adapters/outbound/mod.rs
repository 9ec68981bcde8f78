mod http_model_prober;
mod in_memory_registry;

pub use http_model_prober::{HttpModelProber, DEFAULT_PROBE_TIMEOUT};
pub use in_memory_registry::InMemoryUpstreamRegistry;
