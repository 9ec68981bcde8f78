//! inference-batcher - OpenAI-compatible load balancer for inference servers
//!
//! This is the composition root that wires together all the components.

use inference_batcher::adapters::inbound::HttpServer;
use inference_batcher::adapters::outbound::{HttpModelProber, InMemoryUpstreamRegistry};
use inference_batcher::application::{AdmissionController, DiscoveryService, ProxyService};
use inference_batcher::config::load_config;
use inference_batcher::infrastructure::{shutdown_signal, ShutdownController};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting inference-batcher listen={} upstreams={} max_connections={}",
        cfg.listen_addr,
        cfg.upstreams.len(),
        cfg.max_connections_per_upstream
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters, sharing one connection pool
    let client = reqwest::Client::builder().build()?;
    let registry = Arc::new(InMemoryUpstreamRegistry::new());
    let prober = Arc::new(HttpModelProber::new(client.clone(), cfg.probe_timeout));

    // 2. Discovery: one pass before accepting traffic, then periodic
    let discovery = Arc::new(DiscoveryService::new(registry.clone(), prober));
    let report = discovery.refresh(&cfg.upstreams).await;
    tracing::info!(
        "initial discovery: {}/{} upstreams healthy, {} model record(s)",
        report.healthy,
        report.probed,
        report.inserted
    );

    if !cfg.refresh_interval.is_zero() {
        discovery
            .clone()
            .start(cfg.upstreams.clone(), cfg.refresh_interval);
    }

    // 3. Application service
    let admission = AdmissionController::new(
        cfg.max_connections_per_upstream,
        cfg.timeout,
        cfg.wait_for,
    );
    let proxy_service = Arc::new(ProxyService::new(
        registry,
        discovery,
        admission,
        client,
        cfg.upstreams,
        cfg.refresh_mode,
    ));

    // 4. Inbound adapter, stopped by SIGINT/SIGTERM
    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = HttpServer::new(cfg.listen_addr, proxy_service, shutdown);
    server.run().await
}
