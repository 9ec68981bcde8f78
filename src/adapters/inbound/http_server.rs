//! Client-facing HTTP Server
//!
//! OpenAI-compatible completion routes in front of the upstream pool, plus
//! read-only views of what discovery currently knows.

use crate::application::{Endpoint, ForwardRequest, ProxyError, ProxyService};
use crate::domain::entities::{ModelList, Upstream};
use crate::domain::ports::UpstreamRegistry;
use crate::infrastructure::ShutdownController;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Response header naming the upstream that served the request.
pub const UPSTREAM_ORIGIN_HEADER: &str = "x-upstream-origin";

/// How long streaming responses may run on after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Configured upstream urls
    pub upstreams: usize,
    /// Live (url, model) records
    pub records: usize,
}

/// Registry snapshot response.
#[derive(Debug, Serialize)]
pub struct UpstreamsResponse {
    pub upstreams: Vec<Upstream>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: u16,
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::ModelNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProxyError::AdmissionTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // Nobody reads this one; the client is gone.
            ProxyError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                kind: self.kind(),
                code: status.as_u16(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Server state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyService>,
    pub shutdown: ShutdownController,
}

/// Build the client-facing router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/completions", post(completions_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(models_handler))
        .route("/upstreams", get(upstreams_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server for the proxy.
pub struct HttpServer {
    listen_addr: String,
    state: AppState,
}

impl HttpServer {
    pub fn new(listen_addr: String, proxy: Arc<ProxyService>, shutdown: ShutdownController) -> Self {
        Self {
            listen_addr,
            state: AppState { proxy, shutdown },
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind `listen_addr` and serve until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("inference batcher listening on {}", self.listen_addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// After the signal, new connections are refused and running streams get
    /// `DRAIN_TIMEOUT` to finish before the server returns anyway.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let signal = self.state.shutdown.clone();
        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { signal.wait().await })
            .into_future();

        let shutdown = self.state.shutdown.clone();
        let deadline = async move {
            shutdown.wait().await;
            if shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
                // Drained; let axum finish closing connections.
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = server => result?,
            _ = deadline => {
                tracing::warn!("drain deadline reached, dropping remaining streams");
            }
        }

        tracing::info!("server stopped");
        Ok(())
    }
}

// Handler functions

async fn completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(state, Endpoint::Completions, headers, body).await
}

async fn chat_completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(state, Endpoint::ChatCompletions, headers, body).await
}

async fn forward(state: AppState, endpoint: Endpoint, headers: HeaderMap, body: Bytes) -> Response {
    let guard = state.shutdown.request_guard();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = match state
        .proxy
        .forward(ForwardRequest {
            endpoint,
            body,
            authorization,
        })
        .await
    {
        Ok(response) => response,
        Err(e) => return e.into_response(),
    };

    let content_type = response.content_type();
    let origin = response.upstream_origin();
    // The guard rides along with the body so draining waits for the stream.
    let stream = response.body.map(move |chunk| {
        let _ = &guard;
        chunk
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::CONNECTION, "keep-alive")
        .header(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(&origin) {
        builder = builder.header(UPSTREAM_ORIGIN_HEADER, value);
    }

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn models_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ModelList::from_ids(state.proxy.registry().all_models()))
}

async fn upstreams_handler(State(state): State<AppState>) -> impl IntoResponse {
    let upstreams = state.proxy.registry().snapshot();
    let total = upstreams.len();
    Json(UpstreamsResponse { upstreams, total })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstreams: state.proxy.upstreams().len(),
        records: state.proxy.registry().snapshot().len(),
    };
    Json(response)
}
