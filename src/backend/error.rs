//! Backend failure taxonomy
//!
//! Every failure is either transient (worth retrying locally) or permanent.
//! Each variant also maps to a short apology the display layer can render
//! in place of an answer.

use reqwest::StatusCode;
use thiserror::Error;

pub const CONNECTION_APOLOGY: &str =
    "🔌 Connection lost... Let me try to reconnect and get back to you.";
pub const BUSY_APOLOGY: &str =
    "⏳ The server is quite busy. Please give me a moment to catch up.";
pub const TIMEOUT_APOLOGY: &str = "⌛ Taking longer than expected... Let me speed things up.";
pub const GENERIC_APOLOGY: &str = "🔧 Oops! Something went wrong. I'll fix it and try again.";
pub const UNEXPECTED_APOLOGY: &str =
    "🎯 Unexpected issue. I'll recalibrate and get back on track.";

/// Errors returned by a backend adapter
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Upstream error: status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl BackendError {
    /// Map a non-success HTTP status and its body to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let lower = body.to_lowercase();
            if lower.contains("quota") || lower.contains("resource_exhausted") {
                return BackendError::QuotaExhausted(body);
            }
            return BackendError::RateLimited(body);
        }

        BackendError::Upstream {
            status: status.as_u16(),
            body,
        }
    }

    /// Whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Connection(_) | BackendError::Timeout(_) | BackendError::RateLimited(_) => {
                true
            }
            BackendError::Upstream { status, .. } => *status >= 500,
            BackendError::InvalidResponse(_)
            | BackendError::QuotaExhausted(_)
            | BackendError::Unsupported(_)
            | BackendError::MissingCredentials(_) => false,
        }
    }

    /// User-facing apology for this failure class
    pub fn apology(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => CONNECTION_APOLOGY,
            BackendError::RateLimited(_) | BackendError::QuotaExhausted(_) => BUSY_APOLOGY,
            BackendError::Timeout(_) => TIMEOUT_APOLOGY,
            BackendError::Upstream { .. } | BackendError::MissingCredentials(_) => GENERIC_APOLOGY,
            BackendError::InvalidResponse(_) | BackendError::Unsupported(_) => UNEXPECTED_APOLOGY,
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => "connection",
            BackendError::Timeout(_) => "timeout",
            BackendError::RateLimited(_) => "rate_limited",
            BackendError::Upstream { .. } => "upstream",
            BackendError::InvalidResponse(_) => "invalid_response",
            BackendError::QuotaExhausted(_) => "quota_exhausted",
            BackendError::Unsupported(_) => "unsupported",
            BackendError::MissingCredentials(_) => "missing_credentials",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else if e.is_builder() {
            BackendError::Unsupported(e.to_string())
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(BackendError::Timeout("30s".into()).is_transient());
        assert!(BackendError::RateLimited("slow down".into()).is_transient());
        assert!(BackendError::Upstream { status: 503, body: String::new() }.is_transient());

        assert!(!BackendError::Upstream { status: 400, body: String::new() }.is_transient());
        assert!(!BackendError::InvalidResponse("no choices".into()).is_transient());
        assert!(!BackendError::QuotaExhausted("daily".into()).is_transient());
        assert!(!BackendError::MissingCredentials("XAI_API_KEY".into()).is_transient());
    }

    #[test]
    fn test_status_mapping() {
        let err = BackendError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, BackendError::RateLimited(_)));

        let err = BackendError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.into(),
        );
        assert!(matches!(err, BackendError::QuotaExhausted(_)));

        let err = BackendError::from_status(StatusCode::BAD_GATEWAY, "oops".into());
        assert!(matches!(err, BackendError::Upstream { status: 502, .. }));
    }

    #[test]
    fn test_each_class_has_its_own_apology() {
        assert_eq!(BackendError::Connection(String::new()).apology(), CONNECTION_APOLOGY);
        assert_eq!(BackendError::RateLimited(String::new()).apology(), BUSY_APOLOGY);
        assert_eq!(BackendError::Timeout(String::new()).apology(), TIMEOUT_APOLOGY);
        assert_eq!(
            BackendError::Upstream { status: 500, body: String::new() }.apology(),
            GENERIC_APOLOGY
        );
        assert_eq!(BackendError::InvalidResponse(String::new()).apology(), UNEXPECTED_APOLOGY);
    }
}
