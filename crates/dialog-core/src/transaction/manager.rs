//! # Transaction Manager
//!
//! Turns the asynchronous transport into a request/response API. A caller
//! sends a request and gets a [`PendingTransaction`] back; the manager's event
//! loop routes each matching response, ACK or retransmission timeout from the
//! transport into that handle's channel.
//!
//! ```text
//!   caller ──send_request──▶ table.insert(key) ──▶ transport.send_message
//!                                                        │
//!   caller ◀──wait_final── channel ◀── event loop ◀── TransportEvent
//! ```
//!
//! Requests that do not belong to an outbound exchange (and are not ACKs) are
//! forwarded upward as [`IncomingRequest`]s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use rcs_sip_core::{HeaderAccess, Message, Method, Request, Response};
use rcs_sip_transport::{Transport, TransportEvent};

use crate::error::{TransactionError, TransactionResult};

use super::key::TransactionKey;
use super::table::{TransactionSignal, TransactionTable};

/// Default wait ceiling for one exchange (64 × T1)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(32);

/// Default time the terminating side waits for the ACK of its 2xx
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(32);

/// Capacity of the incoming request channel
const INCOMING_CHANNEL_CAPACITY: usize = 100;

/// Transaction layer settings
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Every request leaves through this relay
    pub outbound_proxy: SocketAddr,
    /// Ceiling applied by [`TransactionManager::send_and_wait`] callers
    pub transaction_timeout: Duration,
    /// Ceiling for [`TransactionManager::wait_for_ack`]
    pub ack_timeout: Duration,
    /// Value of the User-Agent header
    pub user_agent: String,
}

impl TransactionConfig {
    pub fn new(outbound_proxy: SocketAddr) -> Self {
        Self {
            outbound_proxy,
            ..Default::default()
        }
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            outbound_proxy: SocketAddr::from(([127, 0, 0, 1], rcs_sip_transport::DEFAULT_SIP_PORT)),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            user_agent: format!("rcs-sip/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A request that opened a new inbound exchange
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request: Request,
    pub source: SocketAddr,
}

/// What a pending exchange can yield
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// 1xx; more will follow
    Provisional(Response),
    /// Final response; the exchange is over
    Final(Response),
}

/// Handle on one outbound exchange.
///
/// Dropping it before it resolves removes the table entry and stops the
/// transport from retransmitting the request.
pub struct PendingTransaction {
    key: TransactionKey,
    rx: mpsc::UnboundedReceiver<TransactionSignal>,
    table: Arc<TransactionTable>,
    transport: Arc<dyn Transport>,
    resolved: bool,
}

impl PendingTransaction {
    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// Whether a final outcome has already been handed out
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Waits for the next response until `deadline`.
    ///
    /// Reaching the deadline resolves the exchange with
    /// [`TransactionError::Timeout`] unless a final outcome won the race, in
    /// which case that outcome is returned instead.
    pub async fn next_event(&mut self, deadline: Instant) -> TransactionResult<TransactionEvent> {
        if self.resolved {
            return Err(TransactionError::Cancelled);
        }
        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(signal)) => self.on_signal(signal),
            Ok(None) => {
                self.resolved = true;
                Err(TransactionError::ChannelClosed)
            }
            Err(_) => {
                if self.table.remove(&self.key) {
                    self.resolved = true;
                    self.transport.cancel_retransmission(&self.key.context_id());
                    debug!("Transaction {} timed out", self.key);
                    return Err(TransactionError::Timeout(self.key.clone()));
                }
                // resolved concurrently; the outcome is already queued
                while let Ok(signal) = self.rx.try_recv() {
                    if !matches!(signal, TransactionSignal::Provisional(_)) {
                        return self.on_signal(signal);
                    }
                }
                self.resolved = true;
                Err(TransactionError::Timeout(self.key.clone()))
            }
        }
    }

    /// Skips provisional responses and returns the final one
    pub async fn wait_final(&mut self, deadline: Instant) -> TransactionResult<Response> {
        loop {
            match self.next_event(deadline).await? {
                TransactionEvent::Provisional(response) => {
                    trace!("{} provisional {}", self.key, response.status);
                }
                TransactionEvent::Final(response) => return Ok(response),
            }
        }
    }

    /// Abandons the exchange
    pub fn cancel(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.table.remove(&self.key);
            self.transport.cancel_retransmission(&self.key.context_id());
        }
    }

    fn on_signal(&mut self, signal: TransactionSignal) -> TransactionResult<TransactionEvent> {
        match signal {
            TransactionSignal::Provisional(response) => Ok(TransactionEvent::Provisional(response)),
            TransactionSignal::Final(response) => {
                self.resolved = true;
                Ok(TransactionEvent::Final(response))
            }
            TransactionSignal::TransportTimeout => {
                self.resolved = true;
                Err(TransactionError::TransportTimeout(self.key.clone()))
            }
            TransactionSignal::Ack(_) => {
                self.resolved = true;
                warn!("ACK delivered to response waiter {}", self.key);
                Err(TransactionError::Cancelled)
            }
        }
    }
}

impl Drop for PendingTransaction {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("key", &self.key)
            .field("resolved", &self.resolved)
            .finish()
    }
}

/// Request/response front end over a [`Transport`]
pub struct TransactionManager {
    transport: Arc<dyn Transport>,
    table: Arc<TransactionTable>,
    config: TransactionConfig,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Creates the manager and starts consuming `events`.
    ///
    /// Returns the receiver of inbound requests that start new exchanges.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        config: TransactionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<IncomingRequest>) {
        let table = Arc::new(TransactionTable::new());
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CHANNEL_CAPACITY);

        let handle = tokio::spawn(run_event_loop(table.clone(), events, incoming_tx));

        let manager = Arc::new(Self {
            transport,
            table,
            config,
            event_loop: Mutex::new(Some(handle)),
        });
        (manager, incoming_rx)
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn local_addr(&self) -> TransactionResult<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Outstanding exchanges and ACK waiters
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Sends `request` to the outbound proxy and returns a handle on the
    /// exchange.
    pub async fn send_request(&self, request: Request) -> TransactionResult<PendingTransaction> {
        let key = TransactionKey::from_message(&request)
            .ok_or(TransactionError::MissingHeader("Via branch, Call-ID or CSeq"))?;
        let rx = self.table.insert(key.clone());
        debug!("Sending {} as {}", request.method, key);

        if let Err(e) = self
            .transport
            .send_message(request.into(), self.config.outbound_proxy)
            .await
        {
            self.table.remove(&key);
            return Err(e.into());
        }

        Ok(PendingTransaction {
            key,
            rx,
            table: self.table.clone(),
            transport: self.transport.clone(),
            resolved: false,
        })
    }

    /// Sends `request` and waits up to `timeout` for its final response
    pub async fn send_and_wait(&self, request: Request, timeout: Duration) -> TransactionResult<Response> {
        let mut pending = self.send_request(request).await?;
        pending.wait_final(Instant::now() + timeout).await
    }

    /// Sends a message to the outbound proxy without waiting for anything
    pub async fn send_message(&self, message: Message) -> TransactionResult<()> {
        self.transport
            .send_message(message, self.config.outbound_proxy)
            .await?;
        Ok(())
    }

    /// Sends a response to `destination`; the transport keeps it for replay
    pub async fn send_response(&self, response: Response, destination: SocketAddr) -> TransactionResult<()> {
        self.transport
            .send_message(response.into(), destination)
            .await?;
        Ok(())
    }

    /// Waits for the ACK of the INVITE `call_id`/`seq`
    pub async fn wait_for_ack(&self, call_id: &str, seq: u32, timeout: Duration) -> TransactionResult<Request> {
        let mut rx = self.table.insert_ack(call_id, seq);
        let key = TransactionKey {
            branch: String::new(),
            method: Method::Ack,
            call_id: call_id.to_string(),
            seq,
        };

        let signal = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(signal)) => signal,
            Ok(None) => return Err(TransactionError::ChannelClosed),
            Err(_) => {
                if self.table.remove_ack(call_id, seq) {
                    return Err(TransactionError::Timeout(key));
                }
                match rx.try_recv() {
                    Ok(signal) => signal,
                    Err(_) => return Err(TransactionError::Timeout(key)),
                }
            }
        };

        match signal {
            TransactionSignal::Ack(ack) => Ok(ack),
            TransactionSignal::TransportTimeout => Err(TransactionError::TransportTimeout(key)),
            _ => Err(TransactionError::Cancelled),
        }
    }

    /// Closes the transport and releases every waiter
    pub async fn shutdown(&self) -> TransactionResult<()> {
        info!("Shutting down transaction manager");
        let result = self.transport.close().await;
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        self.table.clear();
        result.map_err(Into::into)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transport", &self.transport)
            .field("pending", &self.table.len())
            .finish()
    }
}

async fn run_event_loop(
    table: Arc<TransactionTable>,
    mut events: mpsc::Receiver<TransportEvent>,
    incoming_tx: mpsc::Sender<IncomingRequest>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::MessageReceived {
                message: Message::Response(response),
                ..
            } => match TransactionKey::from_message(&response) {
                Some(key) => {
                    let status = response.status;
                    if !table.resolve_response(&key, response) {
                        debug!("No waiter for {} response to {}", status, key);
                    }
                }
                None => warn!("Dropping response without a transaction key"),
            },
            TransportEvent::MessageReceived {
                message: Message::Request(request),
                source,
                ..
            } => {
                if request.method == Method::Ack {
                    let call_id = request.call_id().map(str::to_string);
                    match (call_id, request.cseq()) {
                        (Some(call_id), Some(cseq)) => {
                            table.resolve_ack(request, &call_id, cseq.seq);
                        }
                        _ => warn!("Dropping ACK without Call-ID or CSeq"),
                    }
                    continue;
                }
                if incoming_tx
                    .send(IncomingRequest { request, source })
                    .await
                    .is_err()
                {
                    debug!("Incoming request receiver dropped");
                }
            }
            TransportEvent::RetransmissionTimeout { context_id } => {
                let key = TransactionKey::from(context_id);
                if !table.resolve_timeout(&key) {
                    debug!("Retransmission timeout for {} had no waiter", key);
                }
            }
            TransportEvent::Error { error } => warn!("Transport error: {}", error),
            TransportEvent::Closed => {
                debug!("Transport closed, stopping transaction event loop");
                break;
            }
        }
    }
    table.clear();
}
