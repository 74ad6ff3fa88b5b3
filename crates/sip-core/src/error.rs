use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or building SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The message could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A header required by the caller is absent
    #[error("Missing header: {0}")]
    MissingHeader(String),

    /// Neither a request line nor a status line
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    /// Status code outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A header value that does not match its grammar
    #[error("Invalid SIP header: {0}")]
    InvalidHeader(String),

    /// Start line or header block is not valid UTF-8
    #[error("Invalid UTF-8 in message head")]
    Utf8,
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::ParseError(format!("Parsing failed: {err}"))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::Utf8
    }
}
