//! Errors surfaced by the proxy use case before any body bytes are sent.

use std::time::Duration;

/// Request-level failures. Each maps to one HTTP status at the edge.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Body is not JSON or has no `model`
    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    /// No registry record serves the requested model
    #[error("No upstream found with {model}, all available models: {available}.")]
    ModelNotFound { model: String, available: String },

    /// Admission control gave up
    #[error("Timeout waiting for a free upstream, try again later")]
    AdmissionTimeout { waited: Duration },

    /// The client went away before forwarding started
    #[error("client closed the connection")]
    Cancelled,
}

impl ProxyError {
    /// OpenAI-style error `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::ModelNotFound { .. } => "model_not_found",
            ProxyError::AdmissionTimeout { .. } => "upstream_unavailable",
            ProxyError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_message() {
        let err = ProxyError::ModelNotFound {
            model: "gpt-4".to_string(),
            available: "falcon-chat-7b,llama2-chat-7b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No upstream found with gpt-4, all available models: falcon-chat-7b,llama2-chat-7b."
        );
        assert_eq!(err.kind(), "model_not_found");
    }

    #[test]
    fn test_admission_timeout_message() {
        let err = ProxyError::AdmissionTimeout {
            waited: Duration::from_secs(1),
        };
        assert_eq!(
            err.to_string(),
            "Timeout waiting for a free upstream, try again later"
        );
    }
}
