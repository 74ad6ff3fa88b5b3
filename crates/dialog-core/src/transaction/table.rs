//! The transaction table
//!
//! Maps each outbound exchange to the channel of the caller waiting on it.
//! Every operation that resolves a waiter removes its entry and sends the
//! outcome while holding the table lock, so a waiter that fails to remove its
//! own entry after a timeout knows the outcome is already sitting in its
//! channel. That gives exactly-once resolution without a separate flag.
//!
//! ACKs are matched on Call-ID and CSeq number because the ACK for a 2xx is
//! a new transaction with its own branch. An ACK that arrives before anyone
//! waits for it is parked for a short while.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use rcs_sip_core::{Method, Request, Response};

use super::key::TransactionKey;

/// How long an unclaimed ACK is kept
const EARLY_ACK_LIFETIME: Duration = Duration::from_secs(32);

/// What a waiter can be woken with
#[derive(Debug)]
pub enum TransactionSignal {
    /// 1xx; the waiter keeps waiting
    Provisional(Response),
    /// Final response; resolves the waiter
    Final(Response),
    /// ACK matching an awaited 2xx; resolves the waiter
    Ack(Request),
    /// The transport gave up retransmitting; resolves the waiter
    TransportTimeout,
}

type AckKey = (String, u32);

#[derive(Default)]
struct TableInner {
    exchanges: HashMap<TransactionKey, mpsc::UnboundedSender<TransactionSignal>>,
    acks: HashMap<AckKey, mpsc::UnboundedSender<TransactionSignal>>,
    early_acks: HashMap<AckKey, (Request, Instant)>,
}

/// Outbound exchanges and ACK waiters, guarded by a single lock
#[derive(Default)]
pub struct TransactionTable {
    inner: Mutex<TableInner>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `key`, replacing any stale one
    pub fn insert(&self, key: TransactionKey) -> mpsc::UnboundedReceiver<TransactionSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().exchanges.insert(key, tx);
        rx
    }

    /// Registers an ACK waiter for the INVITE `call_id`/`seq`.
    ///
    /// An ACK that already arrived is delivered straight away.
    pub fn insert_ack(&self, call_id: &str, seq: u32) -> mpsc::UnboundedReceiver<TransactionSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = (call_id.to_string(), seq);
        let mut inner = self.inner.lock();
        match inner.early_acks.remove(&key) {
            Some((ack, _)) => {
                let _ = tx.send(TransactionSignal::Ack(ack));
            }
            None => {
                inner.acks.insert(key, tx);
            }
        }
        rx
    }

    /// Delivers a response. Provisional responses leave the entry in place.
    ///
    /// Returns `false` when nobody waits for `key`.
    pub fn resolve_response(&self, key: &TransactionKey, response: Response) -> bool {
        let mut inner = self.inner.lock();
        if response.status.is_provisional() {
            return match inner.exchanges.get(key) {
                Some(tx) => tx.send(TransactionSignal::Provisional(response)).is_ok(),
                None => false,
            };
        }
        match inner.exchanges.remove(key) {
            Some(tx) => {
                let _ = tx.send(TransactionSignal::Final(response));
                true
            }
            None => false,
        }
    }

    /// Delivers an ACK, parking it when nobody waits yet
    pub fn resolve_ack(&self, ack: Request, call_id: &str, seq: u32) -> bool {
        let key = (call_id.to_string(), seq);
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner
            .early_acks
            .retain(|_, (_, at)| now.duration_since(*at) < EARLY_ACK_LIFETIME);
        match inner.acks.remove(&key) {
            Some(tx) => {
                let _ = tx.send(TransactionSignal::Ack(ack));
                true
            }
            None => {
                trace!("parking ACK for {}:{}", call_id, seq);
                inner.early_acks.insert(key, (ack, now));
                false
            }
        }
    }

    /// Resolves the waiter of an exchange whose retransmission ladder ran out.
    ///
    /// For an INVITE this also covers the ACK waiter of a 2xx we were
    /// retransmitting.
    pub fn resolve_timeout(&self, key: &TransactionKey) -> bool {
        let mut inner = self.inner.lock();
        let mut resolved = false;
        if let Some(tx) = inner.exchanges.remove(key) {
            let _ = tx.send(TransactionSignal::TransportTimeout);
            resolved = true;
        }
        if key.method == Method::Invite {
            if let Some(tx) = inner.acks.remove(&(key.call_id.clone(), key.seq)) {
                let _ = tx.send(TransactionSignal::TransportTimeout);
                resolved = true;
            }
        }
        resolved
    }

    /// Removes a waiter; `false` means it was already resolved
    pub fn remove(&self, key: &TransactionKey) -> bool {
        self.inner.lock().exchanges.remove(key).is_some()
    }

    /// Removes an ACK waiter; `false` means it was already resolved
    pub fn remove_ack(&self, call_id: &str, seq: u32) -> bool {
        self.inner
            .lock()
            .acks
            .remove(&(call_id.to_string(), seq))
            .is_some()
    }

    /// Outstanding exchanges plus ACK waiters
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.exchanges.len() + inner.acks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every waiter; their channels close
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.exchanges.clear();
        inner.acks.clear();
        inner.early_acks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_sip_core::prelude::*;

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .via("10.0.0.1:5060", "z9hG4bKtable")
            .from(NameAddr::new("sip:alice@example.com").with_tag("a"))
            .to(NameAddr::new("sip:bob@example.com"))
            .call_id("table-test")
            .cseq(1)
            .build()
    }

    fn response(status: StatusCode) -> Response {
        SimpleResponseBuilder::response_from_request(&invite(), status, None).build()
    }

    #[test]
    fn test_provisional_does_not_resolve() {
        let table = TransactionTable::new();
        let key = TransactionKey::from_message(&invite()).unwrap();
        let mut rx = table.insert(key.clone());

        assert!(table.resolve_response(&key, response(StatusCode::RINGING)));
        assert_eq!(table.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(TransactionSignal::Provisional(_))));

        assert!(table.resolve_response(&key, response(StatusCode::OK)));
        assert!(table.is_empty());
        assert!(matches!(rx.try_recv(), Ok(TransactionSignal::Final(_))));
    }

    #[test]
    fn test_resolution_happens_once() {
        let table = TransactionTable::new();
        let key = TransactionKey::from_message(&invite()).unwrap();
        let mut rx = table.insert(key.clone());

        // timeout path wins
        assert!(table.remove(&key));
        assert!(!table.resolve_response(&key, response(StatusCode::OK)));
        assert!(rx.try_recv().is_err());

        // response path wins; the late remover finds the outcome queued
        let mut rx = table.insert(key.clone());
        assert!(table.resolve_response(&key, response(StatusCode::OK)));
        assert!(!table.remove(&key));
        assert!(matches!(rx.try_recv(), Ok(TransactionSignal::Final(_))));
        assert!(!table.resolve_timeout(&key));
    }

    #[test]
    fn test_early_ack_is_parked() {
        let table = TransactionTable::new();
        let ack = invite();
        assert!(!table.resolve_ack(ack, "table-test", 1));
        let mut rx = table.insert_ack("table-test", 1);
        assert!(matches!(rx.try_recv(), Ok(TransactionSignal::Ack(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_invite_timeout_wakes_ack_waiter() {
        let table = TransactionTable::new();
        let key = TransactionKey::from_message(&invite()).unwrap();
        let mut rx = table.insert_ack("table-test", 1);
        assert!(table.resolve_timeout(&key));
        assert!(matches!(rx.try_recv(), Ok(TransactionSignal::TransportTimeout)));
    }
}
