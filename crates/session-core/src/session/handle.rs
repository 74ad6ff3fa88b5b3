//! Application-facing handle on a session

use std::sync::Arc;

use crate::api::{SessionDirection, SessionId, SessionInfo, SessionListener};
use crate::errors::{Result, SessionError};
use crate::feature::FeatureKind;
use crate::sdp::SessionDescription;

use super::listeners::ListenerId;
use super::session::ImsSession;
use super::state::SessionState;

/// Cheap, cloneable reference to a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<ImsSession>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<ImsSession>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn call_id(&self) -> &str {
        self.session.call_id()
    }

    pub fn kind(&self) -> FeatureKind {
        self.session.info().kind
    }

    pub fn direction(&self) -> SessionDirection {
        self.session.info().direction
    }

    pub fn remote_uri(&self) -> &str {
        &self.session.info().remote_uri
    }

    pub fn info(&self) -> &SessionInfo {
        self.session.info()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn local_sdp(&self) -> Option<SessionDescription> {
        self.session.local_sdp()
    }

    pub fn remote_sdp(&self) -> Option<SessionDescription> {
        self.session.remote_sdp()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.session.error()
    }

    /// Accepts an incoming invitation that is still ringing
    pub fn accept(&self) -> Result<()> {
        self.session.accept()
    }

    /// Declines an incoming invitation that is still ringing
    pub fn reject(&self) -> Result<()> {
        self.session.reject()
    }

    /// Hangs up, cancels or declines, depending on the state.
    ///
    /// Returns once the session is over and its listeners were told.
    pub async fn terminate(&self) -> Result<()> {
        self.session.terminate().await
    }

    /// Registers `listener` for this session's events.
    ///
    /// Only a weak reference is kept: the caller owns the listener and
    /// dropping it unregisters it.
    pub fn add_listener(&self, listener: &Arc<dyn SessionListener>) -> ListenerId {
        self.session.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.session.remove_listener(id)
    }

    /// Resolves once the session is established or over
    pub async fn settled(&self) -> SessionState {
        self.session.settled().await
    }

    /// Resolves once the session is over and its terminal event delivered
    pub async fn ended(&self) -> SessionState {
        self.session.ended().await
    }

    pub(crate) fn session(&self) -> &Arc<ImsSession> {
        &self.session
    }
}
