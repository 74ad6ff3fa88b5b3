use std::net::SocketAddr;

use crate::retransmission::RetransmissionConfig;

/// Default channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default SIP signalling port
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Settings for [`UdpTransport::bind_with_config`](crate::UdpTransport::bind_with_config)
#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// Address to bind; port 0 picks an ephemeral port
    pub local_addr: SocketAddr,
    /// Capacity of the event channel
    pub channel_capacity: usize,
    pub retransmission: RetransmissionConfig,
}

impl UdpTransportConfig {
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            retransmission: RetransmissionConfig::default(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_retransmission(mut self, retransmission: RetransmissionConfig) -> Self {
        self.retransmission = retransmission;
        self
    }
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_SIP_PORT)))
    }
}
