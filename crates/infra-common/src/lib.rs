//! Common infrastructure shared by the RCS SIP binaries
//!
//! Currently the tracing subscriber setup every binary performs once at
//! startup.

pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
pub use logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
