//! Public API of the session layer
//!
//! Everything application code touches: identifiers, listener and handler
//! traits, and the collaborator interfaces the stack consumes.

pub mod collaborators;
pub mod handlers;
pub mod types;

pub use collaborators::{
    LoggingNotificationHandler, MediaHandler, MemoryMessageStore, MessageStore, NoopMediaHandler,
    Notification, NotificationHandler, SettingsStore, StoredMessage,
};
pub use handlers::{
    AutoAcceptHandler, IncomingSessionHandler, LoggingListener, RejectAllHandler, SessionListener,
};
pub use types::{SessionDirection, SessionId, SessionInfo};

pub use crate::errors::{CancelReason, Result, SessionError};
pub use crate::feature::FeatureKind;
pub use crate::session::{ListenerId, SessionHandle, SessionState};
