//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Serialize, Serializer};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Opaque identity of an upstream record.
///
/// Stays stable across updates to the record, so in-flight requests can
/// re-find "their" upstream after the registry has been mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UpstreamId(Uuid);

impl UpstreamId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UpstreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a single upstream url was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),
    #[error("{0}:// is not supported")]
    UnsupportedScheme(String),
    #[error("should not have a path: {0}")]
    PathNotAllowed(String),
}

/// Base address of an upstream: absolute http(s), host and port, no path.
///
/// `http://host:1` and `http://host:1/` parse to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamUrl(Url);

impl UpstreamUrl {
    /// Parse and validate a base url.
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let url = Url::parse(input)?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(UrlError::UnsupportedScheme(other.to_string())),
        }

        if url.path() != "/" && !url.path().is_empty() {
            return Err(UrlError::PathNotAllowed(url.path().to_string()));
        }

        Ok(Self(url))
    }

    /// `scheme://host[:port]`, without trailing slash.
    pub fn origin(&self) -> String {
        self.0.origin().ascii_serialization()
    }

    /// Absolute url of an API path on this upstream, e.g. `v1/models`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.origin(), path.trim_start_matches('/'))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UpstreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Serialize for UpstreamUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
