//! Model Prober Port
//!
//! Defines the interface for asking an upstream which models it serves.

use crate::domain::entities::ModelList;
use crate::domain::value_objects::UpstreamUrl;
use async_trait::async_trait;

/// Why a discovery probe failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("probe timed out")]
    Timeout,
    #[error("unhealthy status: {0}")]
    Status(u16),
    #[error("invalid model list: {0}")]
    InvalidBody(String),
}

/// Outbound port for the model-listing endpoint of an upstream.
///
/// Implementations enforce their own timeout; the caller only sees the
/// outcome.
#[async_trait]
pub trait ModelProber: Send + Sync {
    /// Fetch the list of models served at `url`.
    async fn list_models(&self, url: &UpstreamUrl) -> Result<ModelList, ProbeError>;
}
