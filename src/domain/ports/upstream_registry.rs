//! Upstream Registry Port
//!
//! Defines the interface for the in-process set of upstream records.

use crate::domain::entities::Upstream;
use crate::domain::value_objects::{UpstreamId, UpstreamUrl};
use std::collections::{BTreeSet, HashSet};
use std::time::SystemTime;

/// Sole owner of every upstream record.
///
/// Each method is one transaction: implementations must serialize access so
/// that every call appears atomic to concurrent callers. Callers only ever
/// receive cloned snapshots or ids, never references into the store.
pub trait UpstreamRegistry: Send + Sync {
    /// Records serving `model`, in registry order.
    fn list_by_model(&self, model: &str) -> Vec<Upstream>;

    /// Every distinct model name currently known.
    fn all_models(&self) -> BTreeSet<String>;

    /// Every record, in registry order.
    fn snapshot(&self) -> Vec<Upstream>;

    /// Look a record up by id.
    fn get(&self, id: UpstreamId) -> Option<Upstream>;

    /// Insert (url, model) if absent. An existing pair is left untouched,
    /// including its latency. Returns true when a record was inserted.
    fn upsert(&self, url: &UpstreamUrl, model: &str, latency_ms: f64) -> bool;

    /// Remove every record for `url`. Returns how many were removed.
    fn remove_url(&self, url: &UpstreamUrl) -> usize;

    /// Remove the single (url, model) record.
    fn remove(&self, url: &UpstreamUrl, model: &str) -> bool;

    /// Remove every record whose url is not in `urls`.
    fn retain_urls(&self, urls: &HashSet<UpstreamUrl>) -> usize;

    /// Add `delta` to a record's in-flight count, saturating at zero.
    /// A missing record is a no-op and returns false.
    fn adjust_connections(&self, id: UpstreamId, delta: isize) -> bool;

    /// Mark a dispatch: set `last_used` and bump `used`.
    fn touch_usage(&self, id: UpstreamId, at: SystemTime) -> bool;

    /// Whether some record for `model` has fewer than `max_connections` in flight.
    fn has_capacity(&self, model: &str, max_connections: usize) -> bool;

    /// Select an upstream for `model` and account the dispatch on it, in a
    /// single transaction. Returns the record as it is after the increment.
    fn checkout(&self, model: &str, at: SystemTime) -> Option<Upstream>;
}
