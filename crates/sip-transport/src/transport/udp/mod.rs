use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use rcs_sip_core::{parse_message, HeaderAccess, Message, Method};

use crate::config::UdpTransportConfig;
use crate::error::{Error, Result};
use crate::retransmission::{
    ContextId, FireAction, InboundRequestAction, InboundResponseAction, OutboundResponseAction,
    RetransmissionTable,
};
use crate::transport::{Transport, TransportEvent};

// Maximum UDP packet size
const MAX_UDP_PACKET_SIZE: usize = 65_507;

/// UDP transport for SIP messages
///
/// Owns one socket and a single receive loop. Outbound requests and 2xx
/// responses to INVITE are retransmitted on the configured ladder;
/// retransmitted inbound requests are answered from the de-duplication table
/// and never reach the event channel twice.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    table: RetransmissionTable,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let mut config = UdpTransportConfig::new(addr);
        if let Some(capacity) = channel_capacity {
            config.channel_capacity = capacity;
        }
        Self::bind_with_config(config).await
    }

    /// Creates a new UDP transport from a full configuration
    pub async fn bind_with_config(
        config: UdpTransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(config.local_addr)
            .await
            .map_err(|e| Error::BindFailed(config.local_addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: RwLock::new(Some(Arc::new(socket))),
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                table: RetransmissionTable::new(config.retransmission),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        transport.spawn_receive_loop();
        transport.spawn_janitor();

        Ok((transport, events_rx))
    }

    /// Number of live retransmission / de-duplication contexts
    pub fn context_count(&self) -> usize {
        self.inner.table.len()
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self) {
        let Some(socket) = self.inner.socket() else {
            return;
        };
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_UDP_PACKET_SIZE];

            while !inner.closed.load(Ordering::Relaxed) {
                let (len, src) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error receiving packet: {}", e),
                            })
                            .await;
                        continue;
                    }
                };

                let packet = Bytes::copy_from_slice(&buffer[..len]);
                trace!(
                    "Received {} bytes from {}:\n{}",
                    len,
                    src,
                    String::from_utf8_lossy(&packet)
                );

                if !inner.handle_datagram(&packet, src).await {
                    break;
                }
            }
            debug!("UDP receive loop terminated");
        });
        self.inner.tasks.lock().push(handle);
    }

    // Periodically drops idle de-duplication contexts
    fn spawn_janitor(&self) {
        let inner = self.inner.clone();
        let period = std::cmp::max(
            inner.table.config().context_lifetime / 4,
            std::time::Duration::from_millis(50),
        );
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                let purged = inner.table.purge_expired(Instant::now());
                if purged > 0 {
                    trace!("purged {} idle transport contexts", purged);
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    fn spawn_retransmission(&self, id: ContextId) {
        let inner = self.inner.clone();
        let first = inner.table.config().t1;
        let timer_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                if inner.closed.load(Ordering::Relaxed) {
                    return;
                }
                match inner.table.fire(&id) {
                    FireAction::Resend {
                        bytes,
                        destination,
                        next,
                    } => {
                        debug!("Retransmitting {} to {}", id, destination);
                        if let Err(e) = inner.send_raw(&bytes, destination).await {
                            warn!("Retransmission of {} failed: {}", id, e);
                        }
                        delay = next;
                    }
                    FireAction::TimedOut => {
                        warn!("Retransmission ceiling reached for {}", id);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::RetransmissionTimeout { context_id: id })
                            .await;
                        return;
                    }
                    FireAction::Stop => return,
                }
            }
        });
        self.inner.table.set_timer(&timer_id, handle);
    }
}

impl UdpTransportInner {
    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.read().clone()
    }

    async fn send_raw(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        let socket = self.socket().ok_or(Error::TransportClosed)?;
        socket
            .send_to(bytes, destination)
            .await
            .map_err(|e| Error::SendFailed(destination, e))?;
        Ok(())
    }

    /// Handles one datagram; returns `false` once nobody listens for events.
    async fn handle_datagram(&self, packet: &[u8], source: SocketAddr) -> bool {
        let message = match parse_message(packet) {
            Ok(message) => message,
            Err(e) => {
                warn!("Error parsing SIP message from {}: {}", source, e);
                let _ = self
                    .events_tx
                    .send(TransportEvent::Error {
                        error: format!("Error parsing SIP message: {}", e),
                    })
                    .await;
                return true;
            }
        };

        if !message.has_mandatory_headers() {
            warn!("Dropping message from {} without mandatory headers", source);
            return true;
        }
        let Some(id) = ContextId::from_message(&message) else {
            return true;
        };

        let deliver = match &message {
            Message::Request(request) => match self.table.on_inbound_request(&id, request) {
                InboundRequestAction::Deliver => true,
                InboundRequestAction::Replay(bytes, destination) => {
                    debug!("Replaying last response for retransmitted {}", id);
                    if let Err(e) = self.send_raw(&bytes, destination).await {
                        warn!("Replay for {} failed: {}", id, e);
                    }
                    false
                }
                InboundRequestAction::Absorb => {
                    trace!("Absorbing retransmitted {}", id);
                    false
                }
            },
            Message::Response(response) => match self.table.on_inbound_response(&id, response) {
                InboundResponseAction::Deliver { ack } => {
                    if let Some((bytes, destination)) = ack {
                        if let Err(e) = self.send_raw(&bytes, destination).await {
                            warn!("ACK for {} failed: {}", id, e);
                        }
                    }
                    true
                }
                InboundResponseAction::ReplayAck(bytes, destination) => {
                    debug!("Re-acknowledging retransmitted final response for {}", id);
                    if let Err(e) = self.send_raw(&bytes, destination).await {
                        warn!("ACK replay for {} failed: {}", id, e);
                    }
                    false
                }
                InboundResponseAction::Absorb => false,
            },
        };

        if !deliver {
            return true;
        }

        let event = TransportEvent::MessageReceived {
            message,
            source,
            destination: self.local_addr,
        };
        if let Err(e) = self.events_tx.send(event).await {
            error!("Error sending event: {}", e);
            return false;
        }
        true
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        if bytes.len() > MAX_UDP_PACKET_SIZE {
            return Err(Error::PacketTooLarge(bytes.len(), MAX_UDP_PACKET_SIZE));
        }

        let mut ladder = None;
        if let Some(id) = ContextId::from_message(&message) {
            match &message {
                Message::Request(request) if request.method == Method::Ack => {
                    self.inner
                        .table
                        .note_outbound_ack(&id.call_id, id.seq, bytes.clone(), destination);
                }
                Message::Request(request) => {
                    self.inner
                        .table
                        .register_outbound_request(id.clone(), request, bytes.clone(), destination);
                    ladder = Some(id);
                }
                Message::Response(response) => {
                    match self
                        .inner
                        .table
                        .register_response(id.clone(), response, bytes.clone(), destination)
                    {
                        OutboundResponseAction::Send => {}
                        OutboundResponseAction::Retransmit => ladder = Some(id),
                        OutboundResponseAction::Suppress => {
                            debug!("Dropping {} for {}: final response already sent", response.status, id.call_id);
                            return Ok(());
                        }
                    }
                }
            }
        }

        debug!(
            "Sending {} ({} bytes) to {}",
            match &message {
                Message::Request(r) => r.method.to_string(),
                Message::Response(r) => r.status.to_string(),
            },
            bytes.len(),
            destination
        );
        trace!("{}", String::from_utf8_lossy(&bytes));

        self.inner.send_raw(&bytes, destination).await?;

        if let Some(id) = ladder {
            self.spawn_retransmission(id);
        }
        Ok(())
    }

    fn cancel_retransmission(&self, context_id: &ContextId) {
        self.inner.table.cancel(context_id);
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.table.clear();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.socket.write().take();
        let _ = self.inner.events_tx.try_send(TransportEvent::Closed);
        info!("UDP transport on {} closed", self.inner.local_addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
