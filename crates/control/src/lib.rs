//! Control-plane client: a thin request layer over the server's multipart
//! upload endpoints and the object store's part PUT endpoint.
//!
//! Encapsulates per-request timeouts, retry classification, and the
//! decision to rewrite part URLs to an acceleration endpoint. The engine
//! talks to it through the [`ControlPlane`] trait so tests can substitute
//! a scripted mock.

pub mod acceleration;
pub mod api;
pub mod retry;

pub use acceleration::{accelerate_url, qualifies_for_acceleration};
pub use api::{
    ApiFuture, ContentRef, ControlPlane, HttpControlPlane, InitiateResponse, InitiateUpload,
};
pub use retry::{RetryPolicy, is_retryable_status};

/// Error taxonomy for control-plane operations.
///
/// Retry decisions pattern-match on these variants; nothing inspects
/// message strings.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Non-recoverable at this layer: failed initiate/complete, or an
    /// unrecognized server response.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Transport error, timeout, or retry-coded status. Eligible for
    /// backoff up to the per-operation budget.
    #[error("retryable: {message}")]
    Retryable { status: Option<u16>, message: String },

    /// An external cancel token fired. Never retried, never surfaced as a
    /// failure.
    #[error("cancelled")]
    Cancelled,

    /// Malformed response: missing ETag, undecodable body. Fatal for the
    /// affected part.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Classifies an unsuccessful HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = if body.is_empty() {
            format!("server returned {status}")
        } else {
            format!("server returned {status}: {body}")
        };
        if is_retryable_status(status) {
            ApiError::Retryable {
                status: Some(status),
                message,
            }
        } else {
            ApiError::Fatal(message)
        }
    }

    /// Whether the retry loop may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Retryable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_coded_statuses_are_retryable() {
        for status in [408, 429, 500, 502, 503, 504] {
            let err = ApiError::from_status(status, String::new());
            assert!(err.is_retryable(), "{status} should be retryable");
        }
    }

    #[test]
    fn other_statuses_are_fatal() {
        for status in [400, 401, 403, 404, 409, 422] {
            let err = ApiError::from_status(status, "nope".into());
            assert!(!err.is_retryable(), "{status} should be fatal");
            assert!(matches!(err, ApiError::Fatal(_)));
        }
    }

    #[test]
    fn cancelled_and_protocol_never_retryable() {
        assert!(!ApiError::Cancelled.is_retryable());
        assert!(!ApiError::Protocol("missing ETag".into()).is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let err = ApiError::from_status(503, "overloaded".into());
        let text = err.to_string();
        assert!(text.contains("503"));
        assert!(text.contains("overloaded"));
    }
}
