//! Event Handlers for Session Management
//!
//! Application code hears about sessions through two seams:
//!
//! - [`SessionListener`]: per-session lifecycle events, registered on a
//!   session (or on the coordinator for every session) and held weakly
//! - [`IncomingSessionHandler`]: told about each new terminating session and
//!   expected to accept or reject it, now or later
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rcs_session_core::api::*;
//!
//! struct Printer;
//!
//! impl SessionListener for Printer {
//!     fn on_established(&self, session: &SessionInfo) {
//!         println!("{} established with {}", session.call_id, session.remote_uri);
//!     }
//! }
//!
//! # fn attach(handle: &SessionHandle) {
//! let printer: Arc<dyn SessionListener> = Arc::new(Printer);
//! handle.add_listener(&printer);
//! # }
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use super::types::SessionInfo;
use crate::errors::SessionError;
use crate::session::SessionHandle;

/// Lifecycle callbacks of one session.
///
/// A session reports its end exactly once: either [`on_error`] or
/// [`on_terminated`]. Callbacks run on the session's task and must not
/// block.
///
/// [`on_error`]: SessionListener::on_error
/// [`on_terminated`]: SessionListener::on_terminated
pub trait SessionListener: Send + Sync {
    /// A terminating session is ringing locally
    fn on_invitation_received(&self, _session: &SessionInfo) {}

    /// The peer is alerting (180/183)
    fn on_ringing(&self, _session: &SessionInfo) {}

    fn on_established(&self, _session: &SessionInfo) {}

    /// The session failed, was rejected or cancelled
    fn on_error(&self, _session: &SessionInfo, _error: &SessionError) {}

    /// Ended by BYE from either side
    fn on_terminated(&self, _session: &SessionInfo) {}
}

/// Decides what happens to inbound invitations
#[async_trait]
pub trait IncomingSessionHandler: Send + Sync {
    /// Called once per new terminating session, while it rings.
    ///
    /// Call [`SessionHandle::accept`] or [`SessionHandle::reject`] here or
    /// later; without a decision the session times out after the ringing
    /// period.
    async fn on_incoming_session(&self, session: SessionHandle);
}

/// Accepts every invitation
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAcceptHandler;

#[async_trait]
impl IncomingSessionHandler for AutoAcceptHandler {
    async fn on_incoming_session(&self, session: SessionHandle) {
        info!("Auto-accepting {} session {}", session.kind(), session.call_id());
        if let Err(e) = session.accept() {
            warn!("Failed to accept session {}: {}", session.call_id(), e);
        }
    }
}

/// Rejects every invitation with 603
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllHandler;

#[async_trait]
impl IncomingSessionHandler for RejectAllHandler {
    async fn on_incoming_session(&self, session: SessionHandle) {
        info!("Rejecting {} session {}", session.kind(), session.call_id());
        if let Err(e) = session.reject() {
            warn!("Failed to reject session {}: {}", session.call_id(), e);
        }
    }
}

/// Logs every lifecycle event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl SessionListener for LoggingListener {
    fn on_invitation_received(&self, session: &SessionInfo) {
        info!("Invitation from {} ({})", session.remote_uri, session.kind);
    }

    fn on_ringing(&self, session: &SessionInfo) {
        info!("Ringing {}", session.remote_uri);
    }

    fn on_established(&self, session: &SessionInfo) {
        info!("Session {} established", session.call_id);
    }

    fn on_error(&self, session: &SessionInfo, error: &SessionError) {
        warn!("Session {} failed: {}", session.call_id, error);
    }

    fn on_terminated(&self, session: &SessionInfo) {
        info!("Session {} terminated", session.call_id);
    }
}
