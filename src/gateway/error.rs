//! Failure taxonomy for the gateway request pipeline.
//!
//! Every outcome that crosses the gateway boundary is a `Result` carrying
//! `GatewayError`; the pipeline recovers retryable classes internally and
//! surfaces an error only after exhaustion or on a non-retryable class.

use serde_json::Value;
use thiserror::Error;

/// Classification of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection reset, timeout, DNS failure — retryable with backoff
    Transport,
    /// 5xx from the gateway — retryable with backoff
    UpstreamServer,
    /// 429 — waited out inside the pipeline, never consumes retry budget
    Throttled,
    /// 4xx other than 429/401 — not retryable
    Rejected,
    /// Login failure or 401 — fatal to the call, forces a refresh next time
    Authentication,
    /// 2xx body that is not the promised JSON — retried like a server fault
    MalformedResponse,
}

/// A gateway failure with the upstream context attached.
#[derive(Debug, Clone, Error)]
#[error("{message} (status {status})")]
pub struct GatewayError {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP-style status describing the failure (502/503 for synthesized ones)
    pub status: u16,
    /// Gateway envelope errorCode, when one was present
    pub error_code: Option<i64>,
    /// Structured error body, when one was present
    pub details: Option<Value>,
}

/// Result alias used by every gateway operation.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
            status: 503,
            error_code: None,
            details: None,
        }
    }

    pub fn upstream(message: impl Into<String>, status: u16) -> Self {
        Self {
            kind: FailureKind::UpstreamServer,
            message: message.into(),
            status,
            error_code: None,
            details: None,
        }
    }

    pub fn rejected(message: impl Into<String>, status: u16) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
            status,
            error_code: None,
            details: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Authentication,
            message: message.into(),
            status: 401,
            error_code: None,
            details: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MalformedResponse,
            message: message.into(),
            status: 502,
            error_code: None,
            details: None,
        }
    }

    /// Attach the gateway envelope error code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Attach the structured error body.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the pipeline may retry this class with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Transport | FailureKind::UpstreamServer | FailureKind::MalformedResponse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(GatewayError::transport("reset").is_retryable());
        assert!(GatewayError::upstream("boom", 500).is_retryable());
        assert!(GatewayError::malformed("not json").is_retryable());
        assert!(!GatewayError::rejected("bad size", 400).is_retryable());
        assert!(!GatewayError::authentication("expired").is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let err = GatewayError::rejected("order rejected", 400).with_code(5);
        assert_eq!(err.to_string(), "order rejected (status 400)");
        assert_eq!(err.error_code, Some(5));
    }
}
