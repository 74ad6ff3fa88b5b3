//! Error Types for Session Core
//!
//! [`SessionError`] is what listeners see when a session does not end
//! cleanly. Lower layer errors are folded into it once, at the session
//! boundary.

use std::fmt;

use thiserror::Error;

use rcs_dialog_core::{DialogError, TransactionError};
use rcs_sip_core::{Response, StatusCode};

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Who gave up on a session before it was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// Local user cancelled or rejected
    Local,
    /// The peer cancelled (CANCEL, or 487 to our INVITE)
    Remote,
    /// Nobody answered within the ringing period
    RingingTimeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Local => write!(f, "local"),
            CancelReason::Remote => write!(f, "remote"),
            CancelReason::RingingTimeout => write!(f, "ringing timeout"),
        }
    }
}

/// Main error type for session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Malformed message or body
    #[error("Parse error: {0}")]
    Parse(String),

    /// No matching response within the retransmission ceiling
    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    /// Challenge could not be answered, or was repeated
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Non-2xx final response
    #[error("Rejected by peer: {status} {reason}")]
    RejectedByPeer { status: StatusCode, reason: String },

    /// Offer or answer the local side cannot honor
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// Abandoned before establishment
    #[error("Cancelled ({0})")]
    Cancelled(CancelReason),

    /// Operation not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Local setup or programming failure
    #[error("Internal error: {0}")]
    Internal(String),
}

// Convenience constructors
impl SessionError {
    pub fn rejected(response: &Response) -> Self {
        SessionError::RejectedByPeer {
            status: response.status,
            reason: response.reason.clone(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SessionError::InvalidState(msg.into())
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        SessionError::SessionNotFound(id.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SessionError::UnsupportedContent(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SessionError::Internal(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::TransportTimeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled(_))
    }
}

impl From<TransactionError> for SessionError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Timeout(key) | TransactionError::TransportTimeout(key) => {
                SessionError::TransportTimeout(key.to_string())
            }
            TransactionError::Cancelled => SessionError::Cancelled(CancelReason::Local),
            other => SessionError::Internal(other.to_string()),
        }
    }
}

impl From<DialogError> for SessionError {
    fn from(err: DialogError) -> Self {
        match err {
            DialogError::Auth(msg) => SessionError::AuthenticationFailure(msg),
            DialogError::InvalidState(msg) => SessionError::InvalidState(msg),
            DialogError::ProtocolError(msg) => SessionError::Parse(msg),
            DialogError::Sip(e) => SessionError::Parse(e.to_string()),
        }
    }
}

impl From<rcs_sip_transport::Error> for SessionError {
    fn from(err: rcs_sip_transport::Error) -> Self {
        SessionError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_dialog_core::TransactionKey;
    use rcs_sip_core::Method;

    fn key() -> TransactionKey {
        TransactionKey {
            branch: "z9hG4bKerr".into(),
            method: Method::Invite,
            call_id: "errors".into(),
            seq: 1,
        }
    }

    #[test]
    fn test_both_timeouts_become_transport_timeout() {
        assert!(SessionError::from(TransactionError::Timeout(key())).is_timeout());
        assert!(SessionError::from(TransactionError::TransportTimeout(key())).is_timeout());
    }

    #[test]
    fn test_dialog_auth_error_is_authentication_failure() {
        let err = SessionError::from(DialogError::Auth("no credentials".into()));
        assert_eq!(err, SessionError::AuthenticationFailure("no credentials".into()));
    }

    #[test]
    fn test_display() {
        let err = SessionError::Cancelled(CancelReason::RingingTimeout);
        assert_eq!(err.to_string(), "Cancelled (ringing timeout)");
        let err = SessionError::RejectedByPeer {
            status: StatusCode::DECLINE,
            reason: "Decline".into(),
        };
        assert!(err.to_string().starts_with("Rejected by peer: 603"));
    }
}
