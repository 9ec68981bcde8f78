//! Proxy Service - Main application use case
//!
//! Orchestrates one client request: refresh, admission control, selection,
//! connection accounting and the streaming relay to the chosen upstream.
//! This is the primary interface for the inbound adapter.

use crate::application::admission::AdmissionController;
use crate::application::discovery_service::{DiscoveryService, RefreshReport};
use crate::application::errors::ProxyError;
use crate::domain::entities::Upstream;
use crate::domain::ports::UpstreamRegistry;
use crate::domain::value_objects::{UpstreamId, UpstreamUrl};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Chunks buffered between the upstream reader and the client body.
const RELAY_BUFFER: usize = 16;

/// When the per-request discovery pass runs relative to admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Wait for the refresh before checking the model
    #[default]
    Awaited,
    /// Spawn the refresh and continue with the current registry
    Background,
}

/// OpenAI-compatible endpoints the proxy forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Completions,
    ChatCompletions,
}

impl Endpoint {
    /// Path on the upstream, relative to its base url.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Completions => "v1/completions",
            Endpoint::ChatCompletions => "v1/chat/completions",
        }
    }
}

/// A client request, as received.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub endpoint: Endpoint,
    /// Original JSON body, forwarded unchanged
    pub body: Bytes,
    /// Original `Authorization` header value
    pub authorization: Option<String>,
}

/// The only body fields the proxy reads.
#[derive(Debug, Deserialize)]
struct RoutingFields {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
}

/// Response handed back to the inbound adapter once an upstream is chosen.
pub struct ProxyResponse {
    /// The chosen record, as it was right after checkout
    pub upstream: Upstream,
    /// Whether the client asked for server-sent events
    pub streaming: bool,
    /// Upstream bytes as they arrive
    pub body: ProxyBody,
}

impl ProxyResponse {
    pub fn upstream_origin(&self) -> String {
        self.upstream.url.origin()
    }

    pub fn content_type(&self) -> &'static str {
        if self.streaming {
            "text/event-stream"
        } else {
            "application/json"
        }
    }
}

/// Client-facing body stream.
///
/// Dropping it (the client disconnected) cancels the relay, which drops
/// the outbound upstream call.
pub struct ProxyBody {
    chunks: ReceiverStream<io::Result<Bytes>>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ProxyBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

/// RAII guard for one in-flight request on an upstream.
///
/// Checkout already counted the request; dropping the lease gives the slot
/// back. If the record was evicted meanwhile the release is a no-op.
pub struct ConnectionLease {
    registry: Arc<dyn UpstreamRegistry>,
    id: UpstreamId,
}

impl ConnectionLease {
    fn new(registry: Arc<dyn UpstreamRegistry>, id: UpstreamId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.registry.adjust_connections(self.id, -1) {
            tracing::debug!(upstream = ?self.registry.get(self.id), "upstream state after request");
        } else {
            tracing::debug!("upstream {} was evicted while in flight", self.id);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RelayError {
    #[error("upstream request failed: {0}")]
    Request(reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream stream broke: {0}")]
    Stream(reqwest::Error),
}

enum RelayOutcome {
    Completed { bytes: usize },
    Failed(RelayError),
    Cancelled,
}

/// Everything the background relay task needs, owned.
struct Relay {
    client: reqwest::Client,
    target: String,
    origin: String,
    body: Bytes,
    authorization: Option<String>,
    discovery: Arc<DiscoveryService>,
    upstreams: Arc<HashSet<UpstreamUrl>>,
}

impl Relay {
    async fn run(
        self,
        tx: mpsc::Sender<io::Result<Bytes>>,
        cancel: CancellationToken,
        lease: ConnectionLease,
    ) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RelayOutcome::Cancelled,
            outcome = self.stream(&tx) => outcome,
        };

        match outcome {
            RelayOutcome::Completed { bytes } => {
                drop(tx);
                tracing::debug!("relayed {} bytes from {}", bytes, self.origin);
                // The upstream just proved alive; cheap time to re-check the pool.
                self.discovery.refresh(&self.upstreams).await;
            }
            RelayOutcome::Failed(e) => {
                tracing::error!("relay from {} failed: {}", self.origin, e);
                tokio::select! {
                    _ = tx.send(Err(io::Error::other(e))) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            RelayOutcome::Cancelled => {
                tracing::info!(
                    "client closed the connection, aborted the request to {}",
                    self.origin
                );
            }
        }

        drop(lease);
    }

    async fn stream(&self, tx: &mpsc::Sender<io::Result<Bytes>>) -> RelayOutcome {
        let mut req = self
            .client
            .post(&self.target)
            .header(CONTENT_TYPE, "application/json")
            .body(self.body.clone());
        if let Some(auth) = &self.authorization {
            req = req.header(AUTHORIZATION, auth);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return RelayOutcome::Failed(RelayError::Request(e)),
        };
        if !resp.status().is_success() {
            return RelayOutcome::Failed(RelayError::Status(resp.status().as_u16()));
        }

        let mut chunks = resp.bytes_stream();
        let mut bytes = 0;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    bytes += chunk.len();
                    if tx.send(Ok(chunk)).await.is_err() {
                        return RelayOutcome::Cancelled;
                    }
                }
                Err(e) => return RelayOutcome::Failed(RelayError::Stream(e)),
            }
        }

        RelayOutcome::Completed { bytes }
    }
}

/// Proxy service - main application use case.
pub struct ProxyService {
    registry: Arc<dyn UpstreamRegistry>,
    discovery: Arc<DiscoveryService>,
    admission: AdmissionController,
    client: reqwest::Client,
    upstreams: Arc<HashSet<UpstreamUrl>>,
    refresh_mode: RefreshMode,
}

impl ProxyService {
    /// Create a new proxy service over the configured `upstreams`.
    pub fn new(
        registry: Arc<dyn UpstreamRegistry>,
        discovery: Arc<DiscoveryService>,
        admission: AdmissionController,
        client: reqwest::Client,
        upstreams: HashSet<UpstreamUrl>,
        refresh_mode: RefreshMode,
    ) -> Self {
        Self {
            registry,
            discovery,
            admission,
            client,
            upstreams: Arc::new(upstreams),
            refresh_mode,
        }
    }

    pub fn registry(&self) -> &Arc<dyn UpstreamRegistry> {
        &self.registry
    }

    pub fn upstreams(&self) -> &HashSet<UpstreamUrl> {
        &self.upstreams
    }

    /// Run one discovery pass over the configured upstreams.
    pub async fn refresh(&self) -> RefreshReport {
        self.discovery.refresh(&self.upstreams).await
    }

    /// Route `request` to an upstream and start relaying its response.
    ///
    /// Returns as soon as an upstream is chosen; the upstream call itself
    /// runs in a background task feeding `ProxyResponse::body`. Failures
    /// past this point show up as an error in the body stream.
    ///
    /// Dropping the returned future (client gone) ends any admission wait.
    pub async fn forward(&self, request: ForwardRequest) -> Result<ProxyResponse, ProxyError> {
        let fields: RoutingFields = serde_json::from_slice(&request.body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        let model = fields.model;

        let cancel = CancellationToken::new();
        let cancel_on_drop = cancel.clone().drop_guard();

        self.refresh_before_admission().await;

        if self.registry.list_by_model(&model).is_empty() {
            return Err(self.model_not_found(model));
        }

        self.admission
            .wait_for_capacity(self.registry.as_ref(), &model, &cancel)
            .await?;

        let upstream = match self.registry.checkout(&model, SystemTime::now()) {
            Some(upstream) => upstream,
            None => return Err(self.model_not_found(model)),
        };
        let lease = ConnectionLease::new(self.registry.clone(), upstream.id);

        tracing::info!(
            "selected upstream: {} for model: {}",
            upstream.url.origin(),
            model
        );
        tracing::debug!(upstream = ?upstream, "upstream state before request");

        let relay = Relay {
            client: self.client.clone(),
            target: upstream.url.endpoint(request.endpoint.path()),
            origin: upstream.url.origin(),
            body: request.body,
            authorization: request.authorization,
            discovery: self.discovery.clone(),
            upstreams: self.upstreams.clone(),
        };
        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        tokio::spawn(relay.run(tx, cancel, lease));

        Ok(ProxyResponse {
            upstream,
            streaming: fields.stream.unwrap_or(false),
            body: ProxyBody {
                chunks: ReceiverStream::new(rx),
                _cancel_on_drop: cancel_on_drop,
            },
        })
    }

    async fn refresh_before_admission(&self) {
        match self.refresh_mode {
            RefreshMode::Awaited => {
                self.discovery.refresh(&self.upstreams).await;
            }
            RefreshMode::Background => {
                let discovery = self.discovery.clone();
                let upstreams = self.upstreams.clone();
                tokio::spawn(async move {
                    discovery.refresh(&upstreams).await;
                });
            }
        }
    }

    fn model_not_found(&self, model: String) -> ProxyError {
        let available = self
            .registry
            .all_models()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");
        tracing::error!(
            "no upstream found with model {}, all available models: [{}]",
            model,
            available
        );
        ProxyError::ModelNotFound { model, available }
    }
}
