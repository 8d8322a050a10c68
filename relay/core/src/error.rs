//! Error Types
//!
//! Two families of errors exist:
//!
//! - [`RelayError`]: returned from caller-facing operations (connect, join,
//!   ask, begin).
//! - [`SessionError`]: delivered exactly once through a session's
//!   `on_error` callback. Never returned, never retried.

use std::time::Duration;

use thiserror::Error;

use crate::ids::{ConversationId, CorrelationId};
use crate::submission::SubmissionError;
use crate::transport::TransportError;

/// Errors from caller-facing operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// The handshake was not confirmed in time
    #[error("connection not confirmed within {0:?}")]
    ConnectTimeout(Duration),

    /// The transport could not be opened
    #[error("connection failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// Join acknowledgement did not arrive in time
    ///
    /// Soft: the join request was transmitted and the server usually
    /// processes it anyway.
    #[error("no acknowledgement for room {conversation_id} within {timeout:?}")]
    JoinAckTimeout {
        /// Room that was joined
        conversation_id: ConversationId,
        /// How long we waited
        timeout: Duration,
    },

    /// Correlation id reused while its session is still registered
    #[error("session {0} is already registered")]
    DuplicateSession(CorrelationId),

    /// No live duplex channel
    #[error("push channel is not connected")]
    NotConnected,

    /// No tenant to scope the connection to
    #[error("tenant id is empty")]
    UnknownTenant,

    /// Submission endpoint failure
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// Transport failure outside of connect
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The dispatch loop is gone
    #[error("dispatcher has shut down")]
    Shutdown,
}

impl RelayError {
    /// Whether the caller may carry on as if the operation succeeded
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::JoinAckTimeout { .. })
    }
}

/// Why a stream session ended without completing
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No event within the liveness window
    #[error("no stream activity for {0:?}")]
    StreamTimeout(Duration),

    /// Server reported a failure
    #[error("stream failed: {0}")]
    StreamError(String),

    /// Caller cancelled
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The push channel went away underneath the session
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl SessionError {
    /// Whether the caller asked for this outcome
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_timeout_is_soft() {
        let err = RelayError::JoinAckTimeout {
            conversation_id: "c-1".into(),
            timeout: Duration::from_secs(3),
        };
        assert!(err.is_soft());
        assert!(!RelayError::NotConnected.is_soft());
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::StreamError("model overloaded".into()).to_string(),
            "stream failed: model overloaded"
        );
        assert!(SessionError::Cancelled("user".into()).is_cancellation());
        assert!(!SessionError::StreamTimeout(Duration::from_secs(1)).is_cancellation());
    }
}
