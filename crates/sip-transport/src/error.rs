use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transport layer
#[derive(Error, Debug)]
pub enum Error {
    /// The UDP socket could not be bound
    #[error("Failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, #[source] io::Error),

    /// A datagram could not be sent
    #[error("Failed to send to {0}: {1}")]
    SendFailed(SocketAddr, #[source] io::Error),

    /// The transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Serialized message does not fit in one datagram
    #[error("Packet too large: {0} bytes (max {1})")]
    PacketTooLarge(usize, usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
