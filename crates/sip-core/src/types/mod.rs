//! Message model types

pub mod address;
pub mod cseq;
pub mod header;
pub mod message;
pub mod method;
pub mod status;
pub mod via;

pub use address::{find_param, parse_params, split_header_list, unquote, NameAddr, Params};
pub use cseq::CSeq;
pub use header::{Header, HeaderName, Headers};
pub use message::{HeaderAccess, Message, Request, Response, SIP_VERSION};
pub use method::Method;
pub use status::StatusCode;
pub use via::{Via, BRANCH_MAGIC_COOKIE};
