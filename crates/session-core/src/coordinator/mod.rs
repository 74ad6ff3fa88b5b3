//! Top-level IMS coordinator
//!
//! Owns the transport, the transaction table and every session,
//! subscription and publication of one identity, and routes inbound
//! requests to them.

// Module declarations
#[allow(clippy::module_inception)]
mod coordinator;
mod dispatch;

// Re-exports
pub use coordinator::{ImsCoordinator, ImsCoordinatorBuilder};
pub use dispatch::ALLOW_METHODS;
