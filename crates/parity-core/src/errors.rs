use std::time::Duration;

use crate::decision::Action;

/// Typed error hierarchy for the parity harness.
///
/// Every variant is fatal on the client side: nothing in the harness retries
/// or reconnects. Malformed frames never surface here; the codec reports them
/// as [`crate::codec::FrameError`] and the broker drops them.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParityError {
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("duplicate decision for {request_id}: action={action}")]
    DuplicateDecision { request_id: String, action: Action },
    #[error("unexpected decision action for {request_id}: expected={expected}, actual={actual}")]
    UnexpectedAction {
        request_id: String,
        expected: Action,
        actual: Action,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection closed while waiting for {0}")]
    ConnectionClosed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ParityError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::Timeout { .. } => "timeout",
            Self::DuplicateDecision { .. } => "duplicate_decision",
            Self::UnexpectedAction { .. } => "unexpected_action",
            Self::Configuration(_) => "configuration",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_action_names_all_parts() {
        let err = ParityError::UnexpectedAction {
            request_id: "req-a".into(),
            expected: Action::Block,
            actual: Action::Allow,
        };
        assert_eq!(
            err.to_string(),
            "unexpected decision action for req-a: expected=block, actual=allow"
        );
    }

    #[test]
    fn duplicate_decision_display() {
        let err = ParityError::DuplicateDecision {
            request_id: "req-a".into(),
            action: Action::Review,
        };
        assert!(err.to_string().contains("req-a"));
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn timeout_display_includes_subject() {
        let err = ParityError::timeout("response connect-x", Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "timed out after 10s waiting for response connect-x"
        );
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ParityError::config("x").error_kind(), "configuration");
        assert_eq!(
            ParityError::ConnectionClosed("x".into()).error_kind(),
            "connection_closed"
        );
        assert_eq!(
            ParityError::timeout("x", Duration::ZERO).error_kind(),
            "timeout"
        );
        assert_eq!(
            ParityError::Authentication("bad".into()).error_kind(),
            "authentication"
        );
    }
}
