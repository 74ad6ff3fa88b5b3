//! Transaction layer
//!
//! [`TransactionManager::send_and_wait`] gives a synchronous call/response
//! pattern over the asynchronous transport. Each outbound exchange is keyed by
//! [`TransactionKey`] and resolved exactly once, by its final response, by a
//! transport retransmission timeout or by the caller's deadline.

pub mod key;
pub mod manager;
pub mod table;

pub use key::TransactionKey;
pub use manager::{
    IncomingRequest, PendingTransaction, TransactionConfig, TransactionEvent, TransactionManager,
    DEFAULT_ACK_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT,
};
pub use table::{TransactionSignal, TransactionTable};
