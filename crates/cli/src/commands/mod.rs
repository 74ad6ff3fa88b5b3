//! Subcommand implementations

pub mod listen;
pub mod message;
pub mod presence;
pub mod session;
