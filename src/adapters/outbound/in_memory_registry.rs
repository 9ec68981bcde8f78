//! In-Memory Upstream Registry
//!
//! Implements UpstreamRegistry as a Vec behind a single mutex.
//! The record set is small and every operation is a linear scan, so one
//! lock held for the duration of each call is all the coordination needed.

use crate::domain::entities::Upstream;
use crate::domain::ports::UpstreamRegistry;
use crate::domain::services::LoadBalancer;
use crate::domain::value_objects::{UpstreamId, UpstreamUrl};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::time::SystemTime;

/// Mutex-guarded upstream store.
#[derive(Default)]
pub struct InMemoryUpstreamRegistry {
    upstreams: Mutex<Vec<Upstream>>,
}

impl InMemoryUpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records (for diagnostics).
    pub fn len(&self) -> usize {
        self.upstreams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.lock().is_empty()
    }
}

fn adjust(upstream: &mut Upstream, delta: isize) {
    upstream.connections = if delta >= 0 {
        upstream.connections.saturating_add(delta.unsigned_abs())
    } else {
        upstream.connections.saturating_sub(delta.unsigned_abs())
    };
}

impl UpstreamRegistry for InMemoryUpstreamRegistry {
    fn list_by_model(&self, model: &str) -> Vec<Upstream> {
        self.upstreams
            .lock()
            .iter()
            .filter(|u| u.model == model)
            .cloned()
            .collect()
    }

    fn all_models(&self) -> BTreeSet<String> {
        self.upstreams
            .lock()
            .iter()
            .map(|u| u.model.clone())
            .collect()
    }

    fn snapshot(&self) -> Vec<Upstream> {
        self.upstreams.lock().clone()
    }

    fn get(&self, id: UpstreamId) -> Option<Upstream> {
        self.upstreams.lock().iter().find(|u| u.id == id).cloned()
    }

    fn upsert(&self, url: &UpstreamUrl, model: &str, latency_ms: f64) -> bool {
        let mut upstreams = self.upstreams.lock();
        if upstreams.iter().any(|u| u.serves(url, model)) {
            return false;
        }
        upstreams.push(Upstream::new(url.clone(), model, latency_ms));
        true
    }

    fn remove_url(&self, url: &UpstreamUrl) -> usize {
        let mut upstreams = self.upstreams.lock();
        let before = upstreams.len();
        upstreams.retain(|u| u.url != *url);
        before - upstreams.len()
    }

    fn remove(&self, url: &UpstreamUrl, model: &str) -> bool {
        let mut upstreams = self.upstreams.lock();
        let before = upstreams.len();
        upstreams.retain(|u| !u.serves(url, model));
        before != upstreams.len()
    }

    fn retain_urls(&self, urls: &HashSet<UpstreamUrl>) -> usize {
        let mut upstreams = self.upstreams.lock();
        let before = upstreams.len();
        upstreams.retain(|u| urls.contains(&u.url));
        before - upstreams.len()
    }

    fn adjust_connections(&self, id: UpstreamId, delta: isize) -> bool {
        match self.upstreams.lock().iter_mut().find(|u| u.id == id) {
            Some(upstream) => {
                adjust(upstream, delta);
                true
            }
            None => false,
        }
    }

    fn touch_usage(&self, id: UpstreamId, at: SystemTime) -> bool {
        match self.upstreams.lock().iter_mut().find(|u| u.id == id) {
            Some(upstream) => {
                upstream.last_used = Some(at);
                upstream.used += 1;
                true
            }
            None => false,
        }
    }

    fn has_capacity(&self, model: &str, max_connections: usize) -> bool {
        self.upstreams
            .lock()
            .iter()
            .any(|u| u.model == model && u.connections < max_connections)
    }

    fn checkout(&self, model: &str, at: SystemTime) -> Option<Upstream> {
        let mut upstreams = self.upstreams.lock();

        let candidates: Vec<Upstream> = upstreams
            .iter()
            .filter(|u| u.model == model)
            .cloned()
            .collect();
        let chosen = LoadBalancer::pick_upstream(&candidates)?;

        let upstream = upstreams.iter_mut().find(|u| u.id == chosen.id)?;
        adjust(upstream, 1);
        upstream.last_used = Some(at);
        upstream.used += 1;
        Some(upstream.clone())
    }
}
