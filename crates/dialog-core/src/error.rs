//! Error types for dialog-core

use thiserror::Error;

use crate::transaction::TransactionKey;

/// A type alias for transaction results
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// A type alias for dialog results
pub type DialogResult<T> = std::result::Result<T, DialogError>;

/// Errors raised while waiting on an exchange
#[derive(Error, Debug)]
pub enum TransactionError {
    /// No final response within the caller's wait ceiling
    #[error("Transaction timed out: {0}")]
    Timeout(TransactionKey),

    /// The transport exhausted its retransmission ladder
    #[error("Transport gave up on {0}")]
    TransportTimeout(TransactionKey),

    /// Error originating from the sip-transport crate
    #[error("SIP transport error: {0}")]
    Transport(#[from] rcs_sip_transport::Error),

    /// The exchange was abandoned locally
    #[error("Transaction cancelled")]
    Cancelled,

    /// The message cannot be keyed
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// Internal channel error (e.g., receiver dropped)
    #[error("Internal channel closed")]
    ChannelClosed,
}

impl TransactionError {
    /// Either flavour of "no answer"
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransactionError::Timeout(_) | TransactionError::TransportTimeout(_)
        )
    }
}

/// Errors raised by dialog bookkeeping and request construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// The peer's message breaks dialog rules
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Operation not valid in the dialog's current state
    #[error("Invalid dialog state: {0}")]
    InvalidState(String),

    /// A challenge could not be answered
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Error originating from the sip-core crate
    #[error("SIP core error: {0}")]
    Sip(#[from] rcs_sip_core::Error),
}
