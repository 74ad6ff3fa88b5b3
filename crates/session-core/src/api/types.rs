//! Identifiers and descriptors shared by the public API

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feature::FeatureKind;

/// Unique identifier of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side sent the initiating request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionDirection {
    Outgoing,
    Incoming,
}

impl fmt::Display for SessionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionDirection::Outgoing => write!(f, "outgoing"),
            SessionDirection::Incoming => write!(f, "incoming"),
        }
    }
}

/// What listeners are told about the session an event concerns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub call_id: String,
    pub kind: FeatureKind,
    pub direction: SessionDirection,
    /// The peer's address-of-record
    pub remote_uri: String,
}
