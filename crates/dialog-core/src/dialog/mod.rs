//! Dialog types
//!
//! - [`DialogPath`]: identifiers and route set of one conversation
//! - [`DialogState`]: Early, Confirmed, Terminated
//! - [`RequestFactory`]: builds in-dialog requests, ACK, CANCEL and responses
//! - [`utils`]: branch, tag and Call-ID generation
//!
//! ## Dialog Lifecycle
//!
//! ```text
//! Early → Confirmed → Terminated
//!   ↓         ↓           ↓
//!  18x       2xx      BYE / error
//! ```

pub mod dialog_path;
pub mod dialog_state;
pub mod request_builders;
pub mod utils;

pub use dialog_path::DialogPath;
pub use dialog_state::DialogState;
pub use request_builders::{RequestFactory, DEFAULT_MAX_FORWARDS};
pub use utils::{generate_branch, generate_call_id, generate_tag};
