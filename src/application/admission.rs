//! Admission Controller
//!
//! Holds a request back until some upstream for its model has a free
//! connection slot, polling the registry until a wall-clock timeout.

use crate::application::errors::ProxyError;
use crate::domain::ports::UpstreamRegistry;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Admission policy.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    /// Maximum in-flight requests per upstream record
    pub max_connections_per_upstream: usize,
    /// Total time a request may wait for a slot
    pub timeout: Duration,
    /// Delay between registry checks
    pub poll_interval: Duration,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self {
            max_connections_per_upstream: 1,
            timeout: Duration::from_millis(600_000),
            poll_interval: Duration::from_millis(5_000),
        }
    }
}

impl AdmissionController {
    pub fn new(max_connections_per_upstream: usize, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            max_connections_per_upstream,
            timeout,
            poll_interval,
        }
    }

    /// Wait until `model` has spare capacity.
    ///
    /// Nothing is reserved on success: selection happens afterwards, so a
    /// concurrent request may take the slot first. Fails with
    /// `AdmissionTimeout` once the wait reaches `timeout`, or `Cancelled`
    /// as soon as `cancel` fires.
    pub async fn wait_for_capacity(
        &self,
        registry: &dyn UpstreamRegistry,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProxyError> {
        let started = Instant::now();

        while !registry.has_capacity(model, self.max_connections_per_upstream) {
            tracing::info!(
                "waiting {:?} for a free upstream with model {}",
                self.poll_interval,
                model
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("client left while waiting for model {}", model);
                    return Err(ProxyError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                tracing::error!("timeout ({:?}) waiting for a free upstream", self.timeout);
                return Err(ProxyError::AdmissionTimeout { waited });
            }
        }

        Ok(())
    }
}
