//! Narrow interfaces to the outside world
//!
//! Media rendering, message persistence, notification surfaces and the
//! settings database are not part of the stack. Sessions reach them only
//! through these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use rcs_dialog_core::SubscriptionState;

use super::types::{SessionDirection, SessionInfo};
use crate::errors::Result;
use crate::sdp::SessionDescription;

/// Starts and stops the media of established sessions
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Offer/answer is complete; `local` and `remote` are the agreed
    /// descriptions
    async fn start(
        &self,
        session: &SessionInfo,
        local: &SessionDescription,
        remote: &SessionDescription,
    ) -> Result<()>;

    /// The session ended; release everything `start` acquired
    async fn stop(&self, session: &SessionInfo);
}

/// Media handler that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaHandler;

#[async_trait]
impl MediaHandler for NoopMediaHandler {
    async fn start(
        &self,
        session: &SessionInfo,
        _local: &SessionDescription,
        _remote: &SessionDescription,
    ) -> Result<()> {
        debug!("No media handler for {} session {}", session.kind, session.call_id);
        Ok(())
    }

    async fn stop(&self, _session: &SessionInfo) {}
}

/// A pager-mode message sent or received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub direction: SessionDirection,
    /// The other party's address-of-record
    pub peer: String,
    pub call_id: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Persists exchanged messages
pub trait MessageStore: Send + Sync {
    fn store_message(&self, message: StoredMessage);
}

/// Keeps messages in memory
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

impl MessageStore for MemoryMessageStore {
    fn store_message(&self, message: StoredMessage) {
        self.messages.lock().push(message);
    }
}

/// Content of one NOTIFY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Event package name
    pub package: String,
    /// The notifier (presentity or resource list)
    pub from: String,
    pub state: SubscriptionState,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Consumes notification bodies (presence documents, watcher info)
pub trait NotificationHandler: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

/// Logs notifications and drops them
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn on_notification(&self, notification: &Notification) {
        info!(
            "{} notification from {} ({}, {} bytes)",
            notification.package,
            notification.from,
            notification.state,
            notification.body.len()
        );
    }
}

/// Read-only view of the provisioning settings
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl SettingsStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}
