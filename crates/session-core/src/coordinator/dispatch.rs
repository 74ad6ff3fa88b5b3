//! Routing of requests that arrive outside any pending exchange
//!
//! Routing itself is synchronous; answering and session work run on their
//! own tasks so one slow peer never stalls the dispatch loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use rcs_dialog_core::dialog::generate_tag;
use rcs_sip_core::{HeaderAccess, HeaderName, Method, Request, StatusCode};

use super::coordinator::ImsCoordinator;
use crate::api::{SessionDirection, StoredMessage};
use crate::errors::SessionError;
use crate::sdp::SessionDescription;
use crate::session::{ImsSession, SessionHandle};

/// Methods the stack answers outside a dialog
pub const ALLOW_METHODS: &str = "INVITE, ACK, CANCEL, BYE, UPDATE, NOTIFY, MESSAGE, OPTIONS";

const ACCEPT_TYPES: &str = "application/sdp, text/plain, message/cpim";

impl ImsCoordinator {
    pub(super) fn dispatch(self: &Arc<Self>, request: Request, source: SocketAddr) {
        let Some(call_id) = request.call_id().map(str::to_string) else {
            warn!("Dropping {} from {} without Call-ID", request.method, source);
            return;
        };
        debug!("Dispatching {} {} from {}", request.method, call_id, source);

        match request.method {
            Method::Invite => self.dispatch_invite(&call_id, request, source),
            Method::Bye | Method::Cancel | Method::Update => {
                match self.sessions.get(&call_id).map(|entry| entry.value().clone()) {
                    Some(session) => forward(session, request, source),
                    None => self.reply(request, source, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST),
                }
            }
            Method::Notify => self.dispatch_notify(&call_id, request, source),
            Method::Message => self.dispatch_message(call_id, request, source),
            Method::Options => {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    let response = coordinator
                        .ctx
                        .factory
                        .create_response(&request, StatusCode::OK, Some(&generate_tag()))
                        .header(HeaderName::Allow, ALLOW_METHODS)
                        .header(HeaderName::Accept, ACCEPT_TYPES)
                        .build();
                    if let Err(e) = coordinator.ctx.transactions.send_response(response, source).await {
                        warn!("Failed to answer OPTIONS from {}: {}", source, e);
                    }
                });
            }
            // answered at the transport, or a late ACK for a finished exchange
            Method::Ack => {}
            _ => {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    let response = coordinator
                        .ctx
                        .factory
                        .create_response(&request, StatusCode::METHOD_NOT_ALLOWED, Some(&generate_tag()))
                        .header(HeaderName::Allow, ALLOW_METHODS)
                        .build();
                    if let Err(e) = coordinator.ctx.transactions.send_response(response, source).await {
                        warn!("Failed to answer {} from {}: {}", request.method, source, e);
                    }
                });
            }
        }
    }

    fn dispatch_invite(self: &Arc<Self>, call_id: &str, request: Request, source: SocketAddr) {
        if let Some(session) = self.sessions.get(call_id).map(|entry| entry.value().clone()) {
            forward(session, request, source);
            return;
        }
        if request.to_tag().is_some() {
            self.reply(request, source, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            return;
        }

        let offer = match SessionDescription::from_message(&request) {
            Ok(offer) => offer,
            Err(SessionError::UnsupportedContent(reason)) => {
                debug!("Refusing INVITE {}: {}", call_id, reason);
                self.reply(request, source, StatusCode::UNSUPPORTED_MEDIA_TYPE);
                return;
            }
            Err(e) => {
                debug!("Refusing INVITE {}: {}", call_id, e);
                self.reply(request, source, StatusCode::BAD_REQUEST);
                return;
            }
        };
        let Some(feature) = self.feature_factory.select(&offer) else {
            debug!("No feature serves the offer of INVITE {}", call_id);
            self.reply(request, source, StatusCode::UNSUPPORTED_MEDIA_TYPE);
            return;
        };

        let session = match ImsSession::incoming(self.ctx.clone(), feature, request.clone(), source) {
            Ok(session) => session,
            Err(e) => {
                warn!("Cannot build session for INVITE {}: {}", call_id, e);
                self.reply(request, source, StatusCode::BAD_REQUEST);
                return;
            }
        };
        info!(
            "Incoming {} session {} from {}",
            session.info().kind,
            call_id,
            session.info().remote_uri
        );
        self.register(&session);

        let runner = session.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run_incoming().await {
                debug!("Incoming session {} did not establish: {}", runner.call_id(), e);
            }
        });
        let handler = self.incoming_handler.clone();
        tokio::spawn(async move {
            handler.on_incoming_session(SessionHandle::new(session)).await;
        });
    }

    fn dispatch_notify(self: &Arc<Self>, call_id: &str, request: Request, source: SocketAddr) {
        let found = self
            .subscriptions
            .iter()
            .find(|entry| entry.value().matches_notify(&request))
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        let Some((key, manager)) = found else {
            debug!("NOTIFY {} matches no subscription", call_id);
            self.reply(request, source, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            return;
        };
        let coordinator = self.clone();
        tokio::spawn(async move {
            if manager.on_notify(&request, source).await {
                coordinator
                    .subscriptions
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &manager));
            }
        });
    }

    fn dispatch_message(self: &Arc<Self>, call_id: String, request: Request, source: SocketAddr) {
        let message = StoredMessage {
            direction: SessionDirection::Incoming,
            peer: request.from_addr().map(|a| a.uri).unwrap_or_default(),
            call_id,
            content_type: request.content_type().unwrap_or("text/plain").to_string(),
            body: request.body.clone(),
        };
        info!("MESSAGE from {} ({} bytes)", message.peer, message.body.len());
        self.message_store.store_message(message);
        self.reply(request, source, StatusCode::OK);
    }

    /// Answers `request` with a bare `status` in the background
    fn reply(self: &Arc<Self>, request: Request, source: SocketAddr, status: StatusCode) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let response = coordinator
                .ctx
                .factory
                .create_response(&request, status, Some(&generate_tag()))
                .build();
            if let Err(e) = coordinator.ctx.transactions.send_response(response, source).await {
                warn!("Failed to answer {} from {}: {}", request.method, source, e);
            }
        });
    }
}

fn forward(session: Arc<ImsSession>, request: Request, source: SocketAddr) {
    tokio::spawn(async move {
        let method = request.method.clone();
        if let Err(e) = session.on_request(request, source).await {
            warn!("Session {} failed to handle {}: {}", session.call_id(), method, e);
        }
    });
}
