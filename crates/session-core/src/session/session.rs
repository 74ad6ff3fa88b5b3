//! One invitation-based session and its state machine
//!
//! An [`ImsSession`] owns the dialog of a single INVITE exchange, whichever
//! side started it. Outgoing sessions run [`ImsSession::start`]; incoming
//! ones run [`ImsSession::run_incoming`] while the application decides.
//! Requests the peer sends inside the dialog arrive through
//! [`ImsSession::on_request`].
//!
//! Listeners hear exactly one terminal event per session: `on_error` when it
//! was aborted or torn down by a failure, `on_terminated` otherwise.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rcs_dialog_core::dialog::generate_call_id;
use rcs_dialog_core::{DialogPath, DigestClient, PendingTransaction, TransactionEvent};
use rcs_sip_core::{
    HeaderAccess, HeaderName, Method, Request, Response, SimpleRequestBuilder, SimpleResponseBuilder,
    StatusCode,
};

use super::context::StackContext;
use super::listeners::{ListenerId, ListenerRegistry};
use super::state::SessionState;
use super::timer::{parse_session_expires, RefreshOutcome, Refresher, SessionTimerManager};
use crate::api::{SessionDirection, SessionId, SessionInfo, SessionListener};
use crate::errors::{CancelReason, Result, SessionError};
use crate::feature::SessionFeature;
use crate::sdp::SessionDescription;

/// Methods accepted inside an established session
pub const ALLOW_IN_DIALOG: &str = "ACK, BYE, CANCEL, UPDATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Accept,
    Reject,
}

/// How the wait for the local decision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Accept,
    Reject,
    RingingTimeout,
    CancelledByPeer,
}

/// What woke the outgoing INVITE wait
enum Wake {
    Event(rcs_dialog_core::TransactionResult<TransactionEvent>),
    RingingTimeout,
    Cancelled,
}

struct SessionInner {
    state: SessionState,
    dialog: DialogPath,
    /// Our INVITE, or the peer's
    invite: Option<Request>,
    local_sdp: Option<SessionDescription>,
    remote_sdp: Option<SessionDescription>,
    /// Incoming only: a final response to the INVITE has been committed to
    answered: bool,
    media_started: bool,
    last_refresh: Instant,
    error: Option<SessionError>,
}

pub struct ImsSession {
    info: SessionInfo,
    feature: Arc<dyn SessionFeature>,
    ctx: Arc<StackContext>,
    auth: DigestClient,
    listeners: ListenerRegistry,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    decision_tx: Mutex<Option<oneshot::Sender<Decision>>>,
    decision_rx: Mutex<Option<oneshot::Receiver<Decision>>>,
    cancel: Notify,
    finished: AtomicBool,
    /// Set once the terminal event has been delivered
    done_tx: watch::Sender<bool>,
    timer: Mutex<Option<SessionTimerManager>>,
    me: Weak<ImsSession>,
}

impl ImsSession {
    /// A session we are about to invite `target` into
    pub(crate) fn outgoing(ctx: Arc<StackContext>, feature: Arc<dyn SessionFeature>, target: &str) -> Arc<Self> {
        let call_id = generate_call_id(ctx.local_host());
        let dialog = DialogPath::originating(
            call_id.clone(),
            ctx.identity.clone(),
            target,
            ctx.local_contact.clone(),
        );
        let info = SessionInfo {
            id: SessionId::new(),
            call_id,
            kind: feature.kind(),
            direction: SessionDirection::Outgoing,
            remote_uri: target.to_string(),
        };
        Self::with_dialog(ctx, feature, info, dialog, None)
    }

    /// A session for the peer's INVITE
    pub(crate) fn incoming(
        ctx: Arc<StackContext>,
        feature: Arc<dyn SessionFeature>,
        invite: Request,
        source: SocketAddr,
    ) -> Result<Arc<Self>> {
        let mut dialog = DialogPath::terminating(&invite, ctx.local_contact.clone())?;
        dialog.remote_addr = Some(source);
        let info = SessionInfo {
            id: SessionId::new(),
            call_id: dialog.call_id().to_string(),
            kind: feature.kind(),
            direction: SessionDirection::Incoming,
            remote_uri: dialog.remote_uri.clone(),
        };
        Ok(Self::with_dialog(ctx, feature, info, dialog, Some(invite)))
    }

    fn with_dialog(
        ctx: Arc<StackContext>,
        feature: Arc<dyn SessionFeature>,
        info: SessionInfo,
        dialog: DialogPath,
        invite: Option<Request>,
    ) -> Arc<Self> {
        let (decision_tx, decision_rx) = if invite.is_some() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (done_tx, _) = watch::channel(false);
        let auth = DigestClient::new(ctx.credentials.clone());

        Arc::new_cyclic(|me| Self {
            info,
            feature,
            ctx,
            auth,
            listeners: ListenerRegistry::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                dialog,
                invite,
                local_sdp: None,
                remote_sdp: None,
                answered: false,
                media_started: false,
                last_refresh: Instant::now(),
                error: None,
            }),
            state_tx,
            decision_tx: Mutex::new(decision_tx),
            decision_rx: Mutex::new(decision_rx),
            cancel: Notify::new(),
            finished: AtomicBool::new(false),
            done_tx,
            timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.info.id
    }

    pub fn call_id(&self) -> &str {
        &self.info.call_id
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn feature(&self) -> &Arc<dyn SessionFeature> {
        &self.feature
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn local_sdp(&self) -> Option<SessionDescription> {
        self.inner.lock().local_sdp.clone()
    }

    pub fn remote_sdp(&self) -> Option<SessionDescription> {
        self.inner.lock().remote_sdp.clone()
    }

    /// Why the session was aborted or closed, if it was
    pub fn error(&self) -> Option<SessionError> {
        self.inner.lock().error.clone()
    }

    /// Snapshot of the dialog
    pub fn dialog(&self) -> DialogPath {
        self.inner.lock().dialog.clone()
    }

    /// Interval and refresher of the running session timer
    pub fn session_timer(&self) -> Option<(Duration, Refresher)> {
        self.timer.lock().as_ref().map(|t| (t.interval(), t.refresher()))
    }

    pub(crate) fn last_refresh(&self) -> Instant {
        self.inner.lock().last_refresh
    }

    /// Registers a listener; the session keeps only a weak reference
    pub fn add_listener(&self, listener: &Arc<dyn SessionListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Watches state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Waits until the session is established or over
    pub async fn settled(&self) -> SessionState {
        self.wait_for(|s| s.is_established() || s.is_terminal()).await
    }

    /// Waits until the session is over and its listeners have heard so
    pub async fn ended(&self) -> SessionState {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.state()
    }

    async fn wait_for(&self, f: impl FnMut(&SessionState) -> bool) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        let result = rx.wait_for(f).await.map(|state| *state);
        result.unwrap_or_else(|_| self.state())
    }

    // State bookkeeping

    fn set_state(&self, inner: &mut SessionInner, next: SessionState) -> bool {
        if !inner.state.can_transition_to(next) {
            debug!("Session {} ignores {} -> {}", self.info.call_id, inner.state, next);
            return false;
        }
        debug!("Session {} {} -> {}", self.info.call_id, inner.state, next);
        inner.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut inner = self.inner.lock();
        self.set_state(&mut inner, next)
    }

    fn notify(&self, f: impl Fn(&dyn SessionListener, &SessionInfo)) {
        self.listeners.for_each(|listener| f(listener, &self.info));
    }

    /// Delivers the terminal event, once
    fn finish(&self, f: impl Fn(&dyn SessionListener, &SessionInfo)) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.notify(f);
            self.done_tx.send_replace(true);
        }
    }

    /// Moves a not yet established session to `Aborted` and reports `error`
    async fn abort(&self, error: SessionError) -> SessionError {
        let media_started = {
            let mut inner = self.inner.lock();
            if !self.set_state(&mut inner, SessionState::Aborted) {
                return error;
            }
            inner.dialog.terminate();
            inner.error = Some(error.clone());
            std::mem::take(&mut inner.media_started)
        };
        warn!("Session {} aborted: {}", self.info.call_id, error);
        self.release(media_started).await;
        self.finish(|listener, info| listener.on_error(info, &error));
        error
    }

    /// Ends an established session, optionally hanging up with BYE
    async fn end_established(&self, send_bye: bool, error: Option<SessionError>) -> bool {
        let media_started = {
            let mut inner = self.inner.lock();
            if !self.set_state(&mut inner, SessionState::Terminated) {
                return false;
            }
            inner.error = error.clone();
            std::mem::take(&mut inner.media_started)
        };
        self.release(media_started).await;
        if send_bye {
            self.hang_up().await;
        }
        self.inner.lock().dialog.terminate();

        match error {
            Some(error) => {
                warn!("Session {} closed: {}", self.info.call_id, error);
                self.finish(|listener, info| listener.on_error(info, &error));
            }
            None => {
                info!("Session {} terminated", self.info.call_id);
                self.finish(|listener, info| listener.on_terminated(info));
            }
        }
        true
    }

    async fn release(&self, media_started: bool) {
        self.stop_timer();
        if media_started {
            self.ctx.media.stop(&self.info).await;
        }
    }

    fn start_timer(&self, interval: u32, refresher: Refresher) {
        let timer = SessionTimerManager::start(
            self.me.clone(),
            Duration::from_secs(u64::from(interval)),
            refresher,
        );
        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.stop();
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }
    }

    // Outgoing side

    /// Sends the INVITE and drives the exchange to an established or
    /// aborted session
    pub(crate) async fn start(&self) -> Result<()> {
        if !self.transition(SessionState::InvitationSent) {
            return Err(SessionError::invalid_state(format!(
                "cannot invite from {}",
                self.state()
            )));
        }
        info!(
            "Inviting {} to a {} session ({})",
            self.info.remote_uri, self.info.kind, self.info.call_id
        );

        let offer = match self.feature.build_offer(self.ctx.local_host()) {
            Ok(offer) => offer,
            Err(e) => return Err(self.abort(e).await),
        };
        self.inner.lock().local_sdp = Some(offer.clone());

        let mut challenged = false;
        loop {
            let invite = match self.build_invite(&offer) {
                Ok(invite) => invite,
                Err(e) => return Err(self.abort(e).await),
            };
            let response = match self.invite_exchange(&invite).await {
                Ok(response) => response,
                Err(e) => return Err(self.abort(e).await),
            };

            let status = response.status;
            if status.is_success() {
                return self.on_invite_accepted(response).await;
            }
            if is_challenge(status) {
                if challenged {
                    let error = SessionError::AuthenticationFailure(format!("challenged again with {}", status));
                    return Err(self.abort(error).await);
                }
                challenged = true;
                if let Err(e) = self.auth.handle_challenge(&response) {
                    return Err(self.abort(e.into()).await);
                }
                debug!("INVITE {} challenged with {}, retrying", self.info.call_id, status);
                {
                    let mut inner = self.inner.lock();
                    inner.dialog.reset_early();
                    inner.dialog.increment_sequence();
                    self.set_state(&mut inner, SessionState::ChallengeInProgress);
                }
                continue;
            }
            return Err(self.abort(failure_from_response(&response)).await);
        }
    }

    fn build_invite(&self, offer: &SessionDescription) -> Result<Request> {
        let config = &self.ctx.config;
        let mut invite = {
            let inner = self.inner.lock();
            let mut builder = self.feature.decorate(self.ctx.factory.in_dialog(&inner.dialog, Method::Invite));
            if config.session_expires > 0 {
                builder = builder
                    .header(HeaderName::Supported, "timer")
                    .header(HeaderName::SessionExpires, config.session_expires.to_string())
                    .header(HeaderName::MinSE, config.min_session_expires.to_string());
            }
            builder
                .content_type(self.feature.content_type())
                .body(offer.to_string())
                .build()
        };
        self.auth.authorize(&mut invite)?;
        self.inner.lock().invite = Some(invite.clone());
        Ok(invite)
    }

    /// Waits for the final response to `invite`, cancelling it when it rings
    /// too long or the application gives up
    async fn invite_exchange(&self, invite: &Request) -> Result<Response> {
        let mut pending = self.ctx.transactions.send_request(invite.clone()).await?;
        let timeout = self.ctx.transaction_timeout();
        let mut deadline = Instant::now() + timeout;
        let mut ringing_deadline: Option<Instant> = None;

        loop {
            let ringing = async move {
                match ringing_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let wake = tokio::select! {
                event = pending.next_event(deadline) => Wake::Event(event),
                _ = ringing => Wake::RingingTimeout,
                _ = self.cancel.notified() => Wake::Cancelled,
            };

            match wake {
                Wake::Event(event) => match event? {
                    TransactionEvent::Provisional(response) => {
                        if ringing_deadline.is_none() {
                            let at = Instant::now() + self.ctx.config.ringing_timeout;
                            ringing_deadline = Some(at);
                            deadline = at + timeout;
                        }
                        self.on_provisional(&response);
                    }
                    TransactionEvent::Final(response) => return Ok(response),
                },
                Wake::RingingTimeout => {
                    return Err(self.cancel_invite(invite, &mut pending, CancelReason::RingingTimeout).await);
                }
                Wake::Cancelled => {
                    return Err(self.cancel_invite(invite, &mut pending, CancelReason::Local).await);
                }
            }
        }
    }

    fn on_provisional(&self, response: &Response) {
        self.inner.lock().dialog.apply_route_from_response(response);
        let status = response.status;
        if status == StatusCode::RINGING || status == StatusCode::SESSION_PROGRESS {
            debug!("Session {} ringing ({})", self.info.call_id, status);
            self.notify(|listener, info| listener.on_ringing(info));
        }
    }

    async fn cancel_invite(
        &self,
        invite: &Request,
        pending: &mut PendingTransaction,
        reason: CancelReason,
    ) -> SessionError {
        info!("Cancelling INVITE {} ({})", self.info.call_id, reason);
        let cancel = match self.ctx.factory.create_cancel(invite) {
            Ok(cancel) => cancel,
            Err(e) => return e.into(),
        };
        // keep the CANCEL retransmitting until the INVITE resolves
        let _cancel_exchange = match self.ctx.transactions.send_request(cancel).await {
            Ok(exchange) => Some(exchange),
            Err(e) => {
                warn!("Failed to send CANCEL for {}: {}", self.info.call_id, e);
                None
            }
        };

        let deadline = Instant::now() + self.ctx.transaction_timeout();
        match pending.wait_final(deadline).await {
            Ok(response) if response.status.is_success() => {
                debug!("2xx crossed the CANCEL of {}, hanging up", self.info.call_id);
                {
                    let mut inner = self.inner.lock();
                    inner.dialog.apply_route_from_response(&response);
                    inner.dialog.confirm();
                }
                self.send_ack().await;
                self.hang_up().await;
            }
            Ok(response) => debug!("INVITE {} ended with {}", self.info.call_id, response.status),
            Err(e) => debug!("INVITE {} ended without final response: {}", self.info.call_id, e),
        }
        SessionError::Cancelled(reason)
    }

    async fn send_ack(&self) -> bool {
        let mut ack = {
            let inner = self.inner.lock();
            self.ctx.factory.create_ack(&inner.dialog, inner.dialog.local_cseq())
        };
        if let Err(e) = self.auth.authorize(&mut ack) {
            warn!("Sending ACK for {} without credentials: {}", self.info.call_id, e);
        }
        match self.ctx.transactions.send_message(ack.into()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send ACK for {}: {}", self.info.call_id, e);
                false
            }
        }
    }

    async fn on_invite_accepted(&self, response: Response) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.dialog.apply_route_from_response(&response);
            inner.dialog.confirm();
        }
        if !self.send_ack().await {
            let error = SessionError::internal("could not acknowledge the answer");
            return Err(self.abort(error).await);
        }

        let answer = SessionDescription::from_message(&response).and_then(|answer| {
            self.feature.check_answer(&answer)?;
            Ok(answer)
        });
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Unusable answer for {}: {}", self.info.call_id, e);
                self.hang_up().await;
                return Err(self.abort(e).await);
            }
        };

        let timer = response
            .header(&HeaderName::SessionExpires)
            .and_then(parse_session_expires)
            .filter(|(secs, _)| *secs > 0)
            .map(|(secs, refresher)| (secs, Refresher::from_param(refresher.as_deref(), true)));
        self.establish(answer, timer).await
    }

    async fn establish(&self, remote_sdp: SessionDescription, timer: Option<(u32, Refresher)>) -> Result<()> {
        let local_sdp = {
            let mut inner = self.inner.lock();
            if !self.set_state(&mut inner, SessionState::Established) {
                return Err(SessionError::invalid_state(format!(
                    "cannot establish from {}",
                    inner.state
                )));
            }
            inner.dialog.confirm();
            inner.dialog.session_expires = timer.map(|(secs, _)| secs);
            inner.remote_sdp = Some(remote_sdp.clone());
            inner.last_refresh = Instant::now();
            inner.media_started = true;
            inner.local_sdp.clone()
        };
        info!("Session {} established", self.info.call_id);

        if let Some(local_sdp) = local_sdp {
            if let Err(e) = self.ctx.media.start(&self.info, &local_sdp, &remote_sdp).await {
                self.end_established(true, Some(e.clone())).await;
                return Err(e);
            }
        }
        if let Some((interval, refresher)) = timer {
            self.start_timer(interval, refresher);
        }
        self.notify(|listener, info| listener.on_established(info));
        Ok(())
    }

    // Incoming side

    /// Rings, waits for the local decision and answers the peer's INVITE
    pub(crate) async fn run_incoming(&self) -> Result<()> {
        let (invite, source) = {
            let inner = self.inner.lock();
            (inner.invite.clone(), inner.dialog.remote_addr)
        };
        let (Some(invite), Some(source)) = (invite, source) else {
            return Err(SessionError::invalid_state("no invitation to answer"));
        };
        if !self.transition(SessionState::InvitationReceived) {
            return Err(SessionError::invalid_state(format!(
                "cannot answer from {}",
                self.state()
            )));
        }
        info!(
            "Incoming {} session from {} ({})",
            self.info.kind, self.info.remote_uri, self.info.call_id
        );

        let negotiated = SessionDescription::from_message(&invite).and_then(|offer| {
            let answer = self.feature.build_answer(&offer, self.ctx.local_host())?;
            Ok((offer, answer))
        });
        let (offer, answer) = match negotiated {
            Ok(pair) => pair,
            Err(e) => {
                let status = match e {
                    SessionError::UnsupportedContent(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::BAD_REQUEST,
                };
                self.inner.lock().answered = true;
                self.respond_quietly(&invite, source, status).await;
                return Err(self.abort(e).await);
            }
        };
        let timer = self.incoming_timer(&invite);
        {
            let mut inner = self.inner.lock();
            inner.remote_sdp = Some(offer.clone());
            inner.local_sdp = Some(answer.clone());
        }

        if self.inner.lock().answered {
            return Err(self.abort(SessionError::Cancelled(CancelReason::Remote)).await);
        }
        let contact = self.ctx.local_contact.clone();
        if let Err(e) = self
            .respond_with(&invite, source, StatusCode::RINGING, |b| b.contact(&contact))
            .await
        {
            return Err(self.abort(e).await);
        }
        self.notify(|listener, info| listener.on_invitation_received(info));

        match self.await_decision().await {
            Answer::Accept => self.answer_invite(&invite, source, offer, answer, timer).await,
            Answer::Reject => {
                info!("Session {} declined", self.info.call_id);
                self.respond_quietly(&invite, source, StatusCode::DECLINE).await;
                Err(self.abort(SessionError::Cancelled(CancelReason::Local)).await)
            }
            Answer::RingingTimeout => {
                info!("Session {} not answered in time", self.info.call_id);
                self.respond_quietly(&invite, source, StatusCode::TEMPORARILY_UNAVAILABLE).await;
                Err(self.abort(SessionError::Cancelled(CancelReason::RingingTimeout)).await)
            }
            // the 487 went out with the CANCEL's 200
            Answer::CancelledByPeer => Err(self.abort(SessionError::Cancelled(CancelReason::Remote)).await),
        }
    }

    /// Session timer requested by the peer's INVITE, if we take part in it
    fn incoming_timer(&self, invite: &Request) -> Option<(u32, Refresher)> {
        if self.ctx.config.session_expires == 0 {
            return None;
        }
        let (secs, refresher) = parse_session_expires(invite.header(&HeaderName::SessionExpires)?)?;
        if secs < self.ctx.config.min_session_expires {
            debug!(
                "Ignoring Session-Expires {} below our minimum {}",
                secs, self.ctx.config.min_session_expires
            );
            return None;
        }
        Some((secs, Refresher::from_param(refresher.as_deref(), false)))
    }

    async fn await_decision(&self) -> Answer {
        let rx = self.decision_rx.lock().take();
        let answer = match rx {
            Some(rx) => {
                tokio::select! {
                    decision = rx => match decision {
                        Ok(Decision::Accept) => Answer::Accept,
                        Ok(Decision::Reject) | Err(_) => Answer::Reject,
                    },
                    _ = tokio::time::sleep(self.ctx.config.ringing_timeout) => Answer::RingingTimeout,
                    _ = self.cancel.notified() => Answer::CancelledByPeer,
                }
            }
            None => Answer::Reject,
        };

        let mut inner = self.inner.lock();
        if inner.answered {
            Answer::CancelledByPeer
        } else {
            inner.answered = true;
            answer
        }
    }

    async fn answer_invite(
        &self,
        invite: &Request,
        source: SocketAddr,
        offer: SessionDescription,
        answer: SessionDescription,
        timer: Option<(u32, Refresher)>,
    ) -> Result<()> {
        info!("Accepting session {}", self.info.call_id);
        let response = {
            let inner = self.inner.lock();
            let mut builder = self
                .ctx
                .factory
                .create_response(invite, StatusCode::OK, Some(&inner.dialog.local_tag))
                .contact(&inner.dialog.local_target);
            if let Some((secs, refresher)) = timer {
                builder = builder.header(HeaderName::Require, "timer").header(
                    HeaderName::SessionExpires,
                    format!("{};refresher={}", secs, refresher.param(false)),
                );
            }
            builder
                .content_type(self.feature.content_type())
                .body(answer.to_string())
                .build()
        };
        if let Err(e) = self.ctx.transactions.send_response(response, source).await {
            return Err(self.abort(e.into()).await);
        }

        let seq = invite.cseq().map(|cseq| cseq.seq).unwrap_or_default();
        let ack_timeout = self.ctx.transactions.config().ack_timeout;
        match self
            .ctx
            .transactions
            .wait_for_ack(&self.info.call_id, seq, ack_timeout)
            .await
        {
            Ok(_) => self.establish(offer, timer).await,
            Err(e) => {
                warn!("No ACK for session {}: {}", self.info.call_id, e);
                self.hang_up().await;
                let error = SessionError::TransportTimeout(format!("no ACK for {}", self.info.call_id));
                Err(self.abort(error).await)
            }
        }
    }

    /// Accepts a pending incoming invitation
    pub fn accept(&self) -> Result<()> {
        self.decide(Decision::Accept)
    }

    /// Declines a pending incoming invitation with 603
    pub fn reject(&self) -> Result<()> {
        self.decide(Decision::Reject)
    }

    fn decide(&self, decision: Decision) -> Result<()> {
        let tx = self
            .decision_tx
            .lock()
            .take()
            .ok_or_else(|| SessionError::invalid_state("no invitation awaiting a decision"))?;
        tx.send(decision)
            .map_err(|_| SessionError::invalid_state("invitation no longer awaiting a decision"))
    }

    // Requests from the peer

    /// Handles a request the peer sent within this session's dialog
    pub(crate) async fn on_request(&self, request: Request, source: SocketAddr) -> Result<()> {
        match request.method {
            Method::Bye => self.receive_bye(&request, source).await,
            Method::Cancel => self.receive_cancel(&request, source).await,
            Method::Update => self.receive_update(&request, source).await,
            Method::Invite => self.receive_reinvite(&request, source).await,
            _ => {
                self.respond_with(&request, source, StatusCode::METHOD_NOT_ALLOWED, |b| {
                    b.header(HeaderName::Allow, ALLOW_IN_DIALOG)
                })
                .await
            }
        }
    }

    async fn receive_bye(&self, bye: &Request, source: SocketAddr) -> Result<()> {
        let state = {
            let mut inner = self.inner.lock();
            if let Some(cseq) = bye.cseq() {
                if !inner.dialog.accept_remote_sequence(cseq.seq) {
                    debug!("BYE for {} arrived out of sequence", self.info.call_id);
                }
            }
            inner.state
        };
        match state {
            SessionState::Established => {
                self.respond(bye, source, StatusCode::OK).await?;
                info!("Session {} ended by peer", self.info.call_id);
                self.end_established(false, None).await;
                Ok(())
            }
            SessionState::Terminated | SessionState::Aborted => self.respond(bye, source, StatusCode::OK).await,
            _ => {
                self.respond(bye, source, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST)
                    .await
            }
        }
    }

    async fn receive_cancel(&self, cancel: &Request, source: SocketAddr) -> Result<()> {
        self.respond(cancel, source, StatusCode::OK).await?;

        let pending = {
            let mut inner = self.inner.lock();
            if self.info.direction == SessionDirection::Incoming
                && !inner.state.is_terminal()
                && !inner.state.is_established()
                && !inner.answered
            {
                inner.answered = true;
                inner.invite.clone().zip(inner.dialog.remote_addr)
            } else {
                None
            }
        };
        if let Some((invite, invite_source)) = pending {
            info!("Session {} cancelled by peer", self.info.call_id);
            self.respond_quietly(&invite, invite_source, StatusCode::REQUEST_TERMINATED)
                .await;
            self.cancel.notify_one();
        }
        Ok(())
    }

    async fn receive_update(&self, update: &Request, source: SocketAddr) -> Result<()> {
        let established = {
            let mut inner = self.inner.lock();
            if let Some(cseq) = update.cseq() {
                inner.dialog.accept_remote_sequence(cseq.seq);
            }
            if inner.state.is_established() {
                inner.last_refresh = Instant::now();
                true
            } else {
                false
            }
        };
        if !established {
            return self
                .respond(update, source, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST)
                .await;
        }
        debug!("Session {} refreshed by peer", self.info.call_id);
        let contact = self.ctx.local_contact.clone();
        let session_expires = update.header(&HeaderName::SessionExpires).map(str::to_string);
        self.respond_with(update, source, StatusCode::OK, |builder| {
            let builder = builder.contact(&contact);
            match session_expires {
                Some(value) => builder.header(HeaderName::SessionExpires, value),
                None => builder,
            }
        })
        .await
    }

    async fn receive_reinvite(&self, invite: &Request, source: SocketAddr) -> Result<()> {
        debug!("Refusing re-INVITE within {}", self.info.call_id);
        self.respond_with(invite, source, StatusCode::METHOD_NOT_ALLOWED, |b| {
            b.header(HeaderName::Allow, ALLOW_IN_DIALOG)
        })
        .await
    }

    // Local teardown

    /// Ends the session from whatever state it is in
    pub async fn terminate(&self) -> Result<()> {
        match self.state() {
            SessionState::Established => {
                info!("Terminating session {}", self.info.call_id);
                self.end_established(true, None).await;
                Ok(())
            }
            SessionState::InvitationSent | SessionState::ChallengeInProgress => {
                self.cancel.notify_one();
                self.close_after_setup().await
            }
            SessionState::InvitationReceived => {
                if let Err(e) = self.reject() {
                    debug!("Session {} already decided: {}", self.info.call_id, e);
                }
                self.close_after_setup().await
            }
            SessionState::Idle => {
                self.abort(SessionError::Cancelled(CancelReason::Local)).await;
                Ok(())
            }
            SessionState::Terminated | SessionState::Aborted => {
                self.ended().await;
                Ok(())
            }
        }
    }

    /// Waits out a setup that was asked to stop, hanging up if the session
    /// got established anyway
    async fn close_after_setup(&self) -> Result<()> {
        if self.settled().await.is_established() {
            self.end_established(true, None).await;
        }
        self.ended().await;
        Ok(())
    }

    /// Closes an established session after a failure (refresh, media)
    pub(crate) async fn expire(&self, error: SessionError) {
        self.end_established(true, Some(error)).await;
    }

    /// Sends an UPDATE carrying the session interval
    pub(crate) async fn refresh_session(&self) -> RefreshOutcome {
        let interval = {
            let inner = self.inner.lock();
            if !inner.state.is_established() {
                return RefreshOutcome::Stopped;
            }
            inner.dialog.session_expires.unwrap_or(self.ctx.config.session_expires)
        };
        let local_is_uac = self.info.direction == SessionDirection::Outgoing;
        let value = format!("{};refresher={}", interval, Refresher::Local.param(local_is_uac));

        let result = self
            .send_in_dialog(Method::Update, |builder| {
                builder
                    .header(HeaderName::Supported, "timer")
                    .header(HeaderName::SessionExpires, value.clone())
            })
            .await;
        match result {
            Ok(response) if response.status.is_success() => {
                self.inner.lock().last_refresh = Instant::now();
                RefreshOutcome::Refreshed
            }
            Ok(response)
                if response.status == StatusCode::METHOD_NOT_ALLOWED || response.status.as_u16() == 501 =>
            {
                RefreshOutcome::Unsupported
            }
            Ok(response) => RefreshOutcome::Failed(SessionError::rejected(&response)),
            Err(e) => RefreshOutcome::Failed(e),
        }
    }

    /// Sends BYE, logging rather than reporting failures
    async fn hang_up(&self) {
        match self.send_in_dialog(Method::Bye, |builder| builder).await {
            Ok(response) if response.status.is_success() => {
                debug!("BYE for {} acknowledged", self.info.call_id)
            }
            Ok(response) => warn!("BYE for {} answered with {}", self.info.call_id, response.status),
            Err(e) => warn!("BYE for {} failed: {}", self.info.call_id, e),
        }
    }

    /// One in-dialog exchange, answering a single challenge
    async fn send_in_dialog(
        &self,
        method: Method,
        decorate: impl Fn(SimpleRequestBuilder) -> SimpleRequestBuilder,
    ) -> Result<Response> {
        let mut challenged = false;
        loop {
            let mut request = {
                let mut inner = self.inner.lock();
                inner.dialog.increment_sequence();
                decorate(self.ctx.factory.in_dialog(&inner.dialog, method.clone())).build()
            };
            self.auth.authorize(&mut request)?;
            let response = self
                .ctx
                .transactions
                .send_and_wait(request, self.ctx.transaction_timeout())
                .await?;
            if is_challenge(response.status) && !challenged {
                challenged = true;
                self.auth.handle_challenge(&response)?;
                continue;
            }
            return Ok(response);
        }
    }

    async fn respond(&self, request: &Request, source: SocketAddr, status: StatusCode) -> Result<()> {
        self.respond_with(request, source, status, |builder| builder).await
    }

    async fn respond_with(
        &self,
        request: &Request,
        source: SocketAddr,
        status: StatusCode,
        decorate: impl FnOnce(SimpleResponseBuilder) -> SimpleResponseBuilder,
    ) -> Result<()> {
        let local_tag = self.inner.lock().dialog.local_tag.clone();
        let response = decorate(self.ctx.factory.create_response(request, status, Some(&local_tag))).build();
        self.ctx.transactions.send_response(response, source).await?;
        Ok(())
    }

    async fn respond_quietly(&self, request: &Request, source: SocketAddr, status: StatusCode) {
        if let Err(e) = self.respond(request, source, status).await {
            warn!("Failed to send {} for {}: {}", status, self.info.call_id, e);
        }
    }
}

impl std::fmt::Debug for ImsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsSession")
            .field("info", &self.info)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn is_challenge(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
}

fn failure_from_response(response: &Response) -> SessionError {
    match response.status {
        StatusCode::REQUEST_TERMINATED => SessionError::Cancelled(CancelReason::Remote),
        _ => SessionError::rejected(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        let request = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com").build();
        let terminated = SimpleResponseBuilder::response_from_request(&request, StatusCode::REQUEST_TERMINATED, None).build();
        assert_eq!(
            failure_from_response(&terminated),
            SessionError::Cancelled(CancelReason::Remote)
        );

        let busy = SimpleResponseBuilder::response_from_request(&request, StatusCode::BUSY_HERE, None).build();
        assert!(matches!(
            failure_from_response(&busy),
            SessionError::RejectedByPeer { status, .. } if status == StatusCode::BUSY_HERE
        ));
    }

    #[test]
    fn test_challenge_statuses() {
        assert!(is_challenge(StatusCode::UNAUTHORIZED));
        assert!(is_challenge(StatusCode::PROXY_AUTHENTICATION_REQUIRED));
        assert!(!is_challenge(StatusCode::FORBIDDEN));
    }
}
