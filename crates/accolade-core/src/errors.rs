//! Relay error taxonomy.
//!
//! Every variant is scoped to a single connection. Nothing here is fatal to
//! the process.

use thiserror::Error;

/// Errors raised while serving one relay connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Token invalid, expired, or missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Payload could not be parsed as a known message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Identity or database backend could not be reached.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream call did not complete in time.
    #[error("upstream timed out after {0} ms")]
    Timeout(u64),
}

impl RelayError {
    /// Whether the error is reported to the client as `auth_error`.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::UpstreamUnavailable(_) | Self::Timeout(_)
        )
    }

    /// Text sent to the client. Internal details stay in the logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Invalid token",
            Self::UpstreamUnavailable(_) => "Authentication service unavailable",
            Self::Timeout(_) => "Authentication timed out",
            Self::MalformedMessage(_) => "Invalid message format",
            Self::NotAuthenticated => "Authentication required",
        }
    }

    /// Short machine-readable label, used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::MalformedMessage(_) => "malformed_message",
            Self::NotAuthenticated => "not_authenticated",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_grouped() {
        assert!(RelayError::Authentication("bad".into()).is_auth_failure());
        assert!(RelayError::UpstreamUnavailable("down".into()).is_auth_failure());
        assert!(RelayError::Timeout(10_000).is_auth_failure());
        assert!(!RelayError::MalformedMessage("x".into()).is_auth_failure());
        assert!(!RelayError::NotAuthenticated.is_auth_failure());
    }

    #[test]
    fn client_message_hides_details() {
        let err = RelayError::MalformedMessage("expected value at line 1 column 1".into());
        assert_eq!(err.client_message(), "Invalid message format");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn timeout_display() {
        assert_eq!(
            RelayError::Timeout(250).to_string(),
            "upstream timed out after 250 ms"
        );
    }
}
