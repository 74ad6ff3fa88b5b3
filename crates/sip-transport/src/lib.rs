//! SIP transport layer for the RCS client stack
//!
//! This crate provides the UDP transport: a single socket with one receive
//! loop, exponential retransmission of outbound exchanges and replay-based
//! de-duplication of retransmitted inbound requests.

pub mod config;
pub mod error;
pub mod retransmission;
pub mod transport;

pub use config::{UdpTransportConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_SIP_PORT};
pub use error::{Error, Result};
pub use retransmission::{ContextId, RetransmissionConfig};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind_udp, ContextId, Error, RetransmissionConfig, Result, Transport, TransportEvent,
        UdpTransport, UdpTransportConfig,
    };
}
