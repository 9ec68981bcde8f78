mod model_prober;
mod upstream_registry;

pub use model_prober::{ModelProber, ProbeError};
pub use upstream_registry::UpstreamRegistry;
