//! Dialog lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a dialog stands
///
/// ```text
/// Early → Confirmed → Terminated
///   │                    ▲
///   └────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// Initiating request sent or received, no final answer yet
    Early,
    /// A 2xx established the dialog
    Confirmed,
    /// Ended by BYE, error or rejection
    Terminated,
}

impl DialogState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, DialogState::Terminated)
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}
