//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the batcher domain.
//! They have no I/O and contain only business data.

use crate::domain::value_objects::{UpstreamId, UpstreamUrl};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One model served by one upstream address.
///
/// An address serving N models is represented by N records sharing the
/// same `url`. The pair (`url`, `model`) is unique in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Upstream {
    /// Stable identity across updates
    pub id: UpstreamId,
    /// Base address of the backend
    pub url: UpstreamUrl,
    /// Model name served at this address
    pub model: String,
    /// Round-trip time of the discovery probe that created this record
    pub latency_ms: f64,
    /// When a request was last dispatched here
    pub last_used: Option<SystemTime>,
    /// Requests currently in flight
    pub connections: usize,
    /// Lifetime number of dispatched requests
    pub used: u64,
}

impl Upstream {
    /// A never-used record with no connections.
    pub fn new(url: UpstreamUrl, model: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            id: UpstreamId::new(),
            url,
            model: model.into(),
            latency_ms,
            last_used: None,
            connections: 0,
            used: 0,
        }
    }

    pub fn serves(&self, url: &UpstreamUrl, model: &str) -> bool {
        self.url == *url && self.model == model
    }
}

/// Body of `GET /v1/models` as returned by OpenAI-compatible servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default = "list_object")]
    pub object: String,
    pub data: Vec<ModelEntry>,
}

fn list_object() -> String {
    "list".to_string()
}

/// A single model advertised by an upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "model_object")]
    pub object: String,
    #[serde(default)]
    pub owned_by: String,
}

fn model_object() -> String {
    "model".to_string()
}

impl ModelEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: model_object(),
            owned_by: String::new(),
        }
    }
}

impl ModelList {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            object: list_object(),
            data: ids.into_iter().map(ModelEntry::new).collect(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|m| m.id.as_str())
    }
}
