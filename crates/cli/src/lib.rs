//! Command-line client for the RCS SIP stack
//!
//! Every subcommand builds one [`ImsCoordinator`](rcs_session_core::ImsCoordinator)
//! from the global options, runs, and shuts the stack down again.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Command};
