//! Discovery Service
//!
//! Probes configured upstreams for the models they serve and reconciles the
//! registry: new (url, model) pairs are inserted, failing urls are evicted.

use crate::domain::ports::{ModelProber, UpstreamRegistry};
use crate::domain::value_objects::UpstreamUrl;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Summary of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Urls probed
    pub probed: usize,
    /// Urls that answered with a model list
    pub healthy: usize,
    /// Records inserted for newly seen models
    pub inserted: usize,
    /// Records removed because their url failed
    pub evicted: usize,
}

/// Outcome of probing a single url.
#[derive(Debug, Clone, Copy)]
enum ProbeOutcome {
    Healthy { inserted: usize },
    Evicted { evicted: usize },
}

/// Discovery and health refresher.
pub struct DiscoveryService {
    registry: Arc<dyn UpstreamRegistry>,
    prober: Arc<dyn ModelProber>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<dyn UpstreamRegistry>, prober: Arc<dyn ModelProber>) -> Self {
        Self { registry, prober }
    }

    /// Probe every url concurrently and reconcile the registry.
    ///
    /// Returns once all probes have settled. A failing url only affects its
    /// own records; nothing is propagated to the caller.
    pub async fn refresh(&self, urls: &HashSet<UpstreamUrl>) -> RefreshReport {
        let outcomes = join_all(urls.iter().map(|url| self.probe(url))).await;

        let mut report = RefreshReport {
            probed: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Healthy { inserted } => {
                    report.healthy += 1;
                    report.inserted += inserted;
                }
                ProbeOutcome::Evicted { evicted } => {
                    report.evicted += evicted;
                }
            }
        }

        tracing::debug!(
            "refresh: probed={} healthy={} inserted={} evicted={}",
            report.probed,
            report.healthy,
            report.inserted,
            report.evicted
        );
        report
    }

    async fn probe(&self, url: &UpstreamUrl) -> ProbeOutcome {
        let start = Instant::now();
        let result = self.prober.list_models(url).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(models) => {
                let inserted = models
                    .ids()
                    .filter(|model| self.registry.upsert(url, model, latency_ms))
                    .inspect(|model| {
                        tracing::info!(
                            "discovered model {} at {} ({:.1}ms)",
                            model,
                            url.origin(),
                            latency_ms
                        )
                    })
                    .count();
                ProbeOutcome::Healthy { inserted }
            }
            Err(e) => {
                let evicted = self.registry.remove_url(url);
                if evicted > 0 {
                    tracing::warn!(
                        "evicted {} record(s) for {}: {}",
                        evicted,
                        url.origin(),
                        e
                    );
                } else {
                    tracing::debug!("upstream {} still unavailable: {}", url.origin(), e);
                }
                ProbeOutcome::Evicted { evicted }
            }
        }
    }

    /// Drop records whose url is no longer configured.
    pub fn prune(&self, urls: &HashSet<UpstreamUrl>) -> usize {
        let removed = self.registry.retain_urls(urls);
        if removed > 0 {
            tracing::info!("pruned {} record(s) for unconfigured upstreams", removed);
        }
        removed
    }

    /// Start the periodic refresh loop. The first pass runs after `interval`.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(self: Arc<Self>, urls: HashSet<UpstreamUrl>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.prune(&urls);
                self.refresh(&urls).await;
            }
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::{HttpModelProber, InMemoryUpstreamRegistry};
    use crate::domain::entities::ModelList;
    use crate::domain::ports::ProbeError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Prober answering from a fixed table; unknown urls fail.
    struct StaticProber {
        models: HashMap<UpstreamUrl, Vec<&'static str>>,
    }

    #[async_trait]
    impl ModelProber for StaticProber {
        async fn list_models(&self, url: &UpstreamUrl) -> Result<ModelList, ProbeError> {
            self.models
                .get(url)
                .map(|ids| ModelList::from_ids(ids.iter().copied()))
                .ok_or_else(|| ProbeError::Request("connection refused".to_string()))
        }
    }

    fn url(s: &str) -> UpstreamUrl {
        UpstreamUrl::parse(s).unwrap()
    }

    fn urls(list: &[&str]) -> HashSet<UpstreamUrl> {
        list.iter().map(|s| url(s)).collect()
    }

    fn service_with(
        models: Vec<(&str, Vec<&'static str>)>,
    ) -> (Arc<InMemoryUpstreamRegistry>, DiscoveryService) {
        let registry = Arc::new(InMemoryUpstreamRegistry::new());
        let prober = StaticProber {
            models: models.into_iter().map(|(u, m)| (url(u), m)).collect(),
        };
        let service = DiscoveryService::new(registry.clone(), Arc::new(prober));
        (registry, service)
    }

    async fn mount_models(server: &MockServer, status: u16, ids: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(ModelList::from_ids(ids.iter().copied())),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_refresh_inserts_every_model() {
        let (registry, service) = service_with(vec![
            ("http://llama.ai:6666", vec!["llama2-chat-7b"]),
            ("http://multi.ai:6666", vec!["llama2-chat-7b", "falcon-chat-7b"]),
        ]);

        let report = service
            .refresh(&urls(&["http://llama.ai:6666", "http://multi.ai:6666"]))
            .await;

        assert_eq!(report.probed, 2);
        assert_eq!(report.healthy, 2);
        assert_eq!(report.inserted, 3);
        assert_eq!(registry.list_by_model("llama2-chat-7b").len(), 2);
        assert_eq!(registry.list_by_model("falcon-chat-7b").len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (registry, service) =
            service_with(vec![("http://llama.ai:6666", vec!["llama2-chat-7b"])]);
        let configured = urls(&["http://llama.ai:6666"]);

        service.refresh(&configured).await;
        let id = registry.snapshot()[0].id;
        let report = service.refresh(&configured).await;

        assert_eq!(report.inserted, 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].id, id);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refresh_failure_evicts_only_failing_url() {
        let (registry, service) =
            service_with(vec![("http://llama.ai:6666", vec!["llama2-chat-7b"])]);
        let down = url("http://down.ai:6666");
        registry.upsert(&down, "llama2-chat-7b", 1.0);
        registry.upsert(&down, "falcon-chat-7b", 1.0);

        let report = service
            .refresh(&urls(&["http://llama.ai:6666", "http://down.ai:6666"]))
            .await;

        assert_eq!(report.healthy, 1);
        assert_eq!(report.evicted, 2);
        let remaining = registry.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, url("http://llama.ai:6666"));
        assert!(logs_contain("evicted 2 record(s)"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_in_flight_counters() {
        let (registry, service) =
            service_with(vec![("http://llama.ai:6666", vec!["llama2-chat-7b"])]);
        let configured = urls(&["http://llama.ai:6666"]);
        service.refresh(&configured).await;
        let id = registry.snapshot()[0].id;
        registry.adjust_connections(id, 1);

        service.refresh(&configured).await;

        assert_eq!(registry.get(id).unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_refresh_empty_set() {
        let (_, service) = service_with(vec![]);
        assert_eq!(service.refresh(&HashSet::new()).await, RefreshReport::default());
    }

    #[tokio::test]
    async fn test_prune_removes_unconfigured() {
        let (registry, service) = service_with(vec![]);
        registry.upsert(&url("http://a.ai:1"), "m", 1.0);
        registry.upsert(&url("http://b.ai:1"), "m", 1.0);

        assert_eq!(service.prune(&urls(&["http://a.ai:1"])), 1);
        assert_eq!(registry.len(), 1);
    }

    // ===== Against real HTTP upstreams =====

    #[tokio::test]
    async fn test_refresh_evicts_on_error_status() {
        let healthy = MockServer::start().await;
        let failing = MockServer::start().await;
        mount_models(&healthy, 200, &["llama2-chat-7b"]).await;
        mount_models(&failing, 200, &["llama2-chat-7b"]).await;

        let registry = Arc::new(InMemoryUpstreamRegistry::new());
        let service = DiscoveryService::new(registry.clone(), Arc::new(HttpModelProber::default()));
        let configured: HashSet<UpstreamUrl> =
            [url(&healthy.uri()), url(&failing.uri())].into_iter().collect();

        service.refresh(&configured).await;
        assert_eq!(registry.len(), 2);

        failing.reset().await;
        mount_models(&failing, 500, &[]).await;
        let report = service.refresh(&configured).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(registry.snapshot()[0].url, url(&healthy.uri()));
    }

    #[tokio::test]
    async fn test_refresh_records_probe_latency_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ModelList::from_ids(["llama2-chat-7b"]))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let registry = Arc::new(InMemoryUpstreamRegistry::new());
        let service = DiscoveryService::new(registry.clone(), Arc::new(HttpModelProber::default()));
        let configured: HashSet<UpstreamUrl> = [url(&server.uri())].into_iter().collect();

        service.refresh(&configured).await;
        let first = registry.snapshot()[0].latency_ms;
        assert!(first >= 150.0);

        server.reset().await;
        mount_models(&server, 200, &["llama2-chat-7b"]).await;
        service.refresh(&configured).await;

        // The pair already exists, so the faster probe does not overwrite it.
        assert_eq!(registry.snapshot()[0].latency_ms, first);
    }

    #[tokio::test]
    async fn test_start_runs_periodically() {
        let (registry, service) =
            service_with(vec![("http://llama.ai:6666", vec!["llama2-chat-7b"])]);
        registry.upsert(&url("http://gone.ai:1"), "m", 1.0);

        let handle = Arc::new(service).start(
            urls(&["http://llama.ai:6666"]),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let records = registry.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, "llama2-chat-7b");
    }
}
