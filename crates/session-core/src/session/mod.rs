//! Invitation-based sessions
//!
//! [`ImsSession`] is the state machine, [`SessionHandle`] what applications
//! hold, and [`SessionTimerManager`] keeps established sessions refreshed.

pub mod context;
pub mod handle;
pub mod listeners;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;
pub mod timer;

pub use context::StackContext;
pub use handle::SessionHandle;
pub use listeners::{ListenerId, ListenerRegistry};
pub use session::{ImsSession, ALLOW_IN_DIALOG};
pub use state::SessionState;
pub use timer::{parse_session_expires, Refresher, SessionTimerManager};
