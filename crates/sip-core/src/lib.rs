//! SIP message model for the RCS client stack
//!
//! This crate provides the request/response types, the wire parser and the
//! serializer used by the transport, dialog and session layers.
//!
//! - [`parse_message`] accepts one datagram and returns a [`Message`]
//! - [`Message::to_bytes`] writes it back, recomputing Content-Length
//! - [`builder`] offers fluent request/response construction

pub mod builder;
pub mod error;
pub mod parser;
pub mod types;

pub use builder::{SimpleRequestBuilder, SimpleResponseBuilder};
pub use error::{Error, Result};
pub use parser::parse_message;
pub use types::*;

/// Re-export of common types and functions
pub mod prelude {
    pub use crate::builder::{SimpleRequestBuilder, SimpleResponseBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::{
        find_param, split_header_list, CSeq, Header, HeaderAccess, HeaderName, Headers, Message,
        Method, NameAddr, Request, Response, StatusCode, Via,
    };
}
