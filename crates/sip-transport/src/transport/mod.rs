pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use rcs_sip_core::Message;

use crate::error::Result;
use crate::retransmission::ContextId;

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new (non-retransmitted) message arrived
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },

    /// The retransmission ladder for an exchange ran out
    RetransmissionTimeout { context_id: ContextId },

    /// Transport error; the transport keeps running
    Error { error: String },

    /// Transport closed
    Closed,
}

/// A SIP transport
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Local bound address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends a message, registering it for retransmission or de-duplication
    /// as appropriate.
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Stops retransmitting the exchange identified by `context_id`
    fn cancel_retransmission(&self, context_id: &ContextId);

    /// Closes the transport, cancelling every pending timer
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
