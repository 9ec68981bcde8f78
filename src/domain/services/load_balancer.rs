//! Load Balancer Service
//!
//! Pure domain logic for selecting the upstream that serves a request.
//! This service has NO external dependencies - it's pure Rust.

use crate::domain::entities::Upstream;

/// Load balancer service for selecting upstreams.
///
/// Selection runs in two stages over the records serving one model:
/// 1. Least connections (ties are all kept)
/// 2. Least discovery latency among the survivors (earliest wins on ties)
///
/// Both stages are left-to-right scans in registry order, so the result is
/// fully determined by the snapshot it is given.
pub struct LoadBalancer;

impl LoadBalancer {
    /// Select one upstream from `upstreams`, or None if the slice is empty.
    ///
    /// # Example
    /// ```ignore
    /// let chosen = LoadBalancer::pick_upstream(&registry.list_by_model("llama2-chat-7b"));
    /// ```
    pub fn pick_upstream(upstreams: &[Upstream]) -> Option<Upstream> {
        let candidates = Self::least_connections(upstreams);
        Self::least_latency(&candidates)
    }

    /// Keep every upstream whose connection count equals the minimum.
    ///
    /// Seeded with the first record; a strictly smaller count replaces the
    /// candidate set, an equal count is appended, a larger one is skipped.
    pub fn least_connections(upstreams: &[Upstream]) -> Vec<Upstream> {
        let Some((first, rest)) = upstreams.split_first() else {
            return Vec::new();
        };

        let mut candidates = vec![first.clone()];
        let mut min_connections = first.connections;

        for upstream in rest {
            if upstream.connections < min_connections {
                candidates.clear();
                candidates.push(upstream.clone());
                min_connections = upstream.connections;
            } else if upstream.connections == min_connections {
                candidates.push(upstream.clone());
            }
        }

        candidates
    }

    /// The upstream with the strictly smallest latency; the earliest one on ties.
    pub fn least_latency(upstreams: &[Upstream]) -> Option<Upstream> {
        let mut best: Option<&Upstream> = None;

        for upstream in upstreams {
            match best {
                Some(current) if upstream.latency_ms < current.latency_ms => {
                    best = Some(upstream);
                }
                None => {
                    best = Some(upstream);
                }
                _ => {}
            }
        }

        best.cloned()
    }
}
