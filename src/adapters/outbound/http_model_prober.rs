//! HTTP Model Prober
//!
//! Implements ModelProber with reqwest against `GET {url}/v1/models`.

use crate::domain::entities::ModelList;
use crate::domain::ports::{ModelProber, ProbeError};
use crate::domain::value_objects::UpstreamUrl;
use async_trait::async_trait;
use std::time::Duration;

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// reqwest-backed prober with a per-request timeout.
pub struct HttpModelProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpModelProber {
    /// Create a prober sharing `client` (connection pool) with the proxy.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpModelProber {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl ModelProber for HttpModelProber {
    async fn list_models(&self, url: &UpstreamUrl) -> Result<ModelList, ProbeError> {
        let endpoint = url.endpoint("v1/models");

        let resp = self
            .client
            .get(&endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Request(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }

        resp.json::<ModelList>().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::InvalidBody(e.to_string())
            }
        })
    }
}
