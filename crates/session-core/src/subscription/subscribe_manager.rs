//! SUBSCRIBE side of an event subscription (RFC 6665)
//!
//! One dialog is kept across refreshes. A successful SUBSCRIBE arms a
//! refresh at a fraction of the duration the server granted; a NOTIFY with
//! `Subscription-State: terminated` ends the subscription without waiting for
//! it to expire.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rcs_dialog_core::dialog::generate_call_id;
use rcs_dialog_core::{DialogPath, DigestClient, EventPackage, SubscriptionState};
use rcs_sip_core::{HeaderAccess, HeaderName, Method, Request, Response, StatusCode};

use super::{is_challenge, min_expires};
use crate::api::{Notification, NotificationHandler};
use crate::errors::Result;
use crate::session::StackContext;

struct SubscriptionRecord {
    dialog: DialogPath,
    /// A SUBSCRIBE already went out within `dialog`
    sent: bool,
    subscribed: bool,
    expires_at: Option<Instant>,
    /// Duration asked for by the last subscribe call
    requested: u32,
    state: Option<SubscriptionState>,
}

pub struct SubscribeManager {
    ctx: Arc<StackContext>,
    package: Arc<dyn EventPackage>,
    target: String,
    auth: DigestClient,
    handler: Arc<dyn NotificationHandler>,
    record: Mutex<SubscriptionRecord>,
    refresh: Mutex<Option<JoinHandle<()>>>,
    /// Serializes subscribe, refresh and unsubscribe
    op: tokio::sync::Mutex<()>,
    me: Weak<SubscribeManager>,
}

impl SubscribeManager {
    pub fn new(
        ctx: Arc<StackContext>,
        package: Arc<dyn EventPackage>,
        target: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Arc<Self> {
        let target = target.into();
        let dialog = DialogPath::originating(
            generate_call_id(ctx.local_host()),
            ctx.identity.clone(),
            target.clone(),
            ctx.local_contact.clone(),
        );
        let auth = DigestClient::new(ctx.credentials.clone());
        Arc::new_cyclic(|me| Self {
            ctx,
            package,
            target,
            auth,
            handler,
            record: Mutex::new(SubscriptionRecord {
                dialog,
                sent: false,
                subscribed: false,
                expires_at: None,
                requested: 0,
                state: None,
            }),
            refresh: Mutex::new(None),
            op: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn package_name(&self) -> &str {
        self.package.name()
    }

    /// Call-ID of the subscription dialog, stable across refreshes and
    /// renewed when the subscription ends
    pub fn call_id(&self) -> String {
        self.record.lock().dialog.call_id().to_string()
    }

    /// Subscribed and not yet expired
    pub fn is_subscribed(&self) -> bool {
        let record = self.record.lock();
        record.subscribed && record.expires_at.map_or(false, |at| at > Instant::now())
    }

    /// Last state reported by the notifier
    pub fn state(&self) -> Option<SubscriptionState> {
        self.record.lock().state.clone()
    }

    /// Subscribes, or refreshes the subscription, for `expiry` seconds.
    ///
    /// Returns whether the server accepted. A rejection marks the record
    /// unsubscribed; a transport failure leaves it as it was.
    pub async fn subscribe(&self, expiry: u32) -> bool {
        let _op = self.op.lock().await;
        self.cancel_refresh();
        self.subscribe_locked(expiry).await
    }

    async fn subscribe_locked(&self, expiry: u32) -> bool {
        self.record.lock().requested = expiry;
        let (response, asked) = match self.exchange(expiry).await {
            Ok(result) => result,
            Err(e) => {
                warn!("SUBSCRIBE to {} failed: {}", self.target, e);
                return false;
            }
        };

        if !response.status.is_success() {
            warn!(
                "{} subscription to {} rejected: {} {}",
                self.package.name(),
                self.target,
                response.status,
                response.reason
            );
            self.reset();
            return false;
        }

        let granted = response.expires().unwrap_or(asked);
        {
            let mut record = self.record.lock();
            record.dialog.apply_route_from_response(&response);
            record.dialog.confirm();
            record.subscribed = granted > 0;
            record.expires_at = Some(Instant::now() + Duration::from_secs(u64::from(granted)));
        }
        info!(
            "Subscribed to {} of {} for {}s",
            self.package.name(),
            self.target,
            granted
        );
        if granted > 0 {
            self.schedule_refresh(self.ctx.config.refresh_delay(granted));
        }
        true
    }

    /// One SUBSCRIBE, answering a single challenge and a single 423
    async fn exchange(&self, mut expiry: u32) -> Result<(Response, u32)> {
        let mut challenged = false;
        let mut interval_raised = false;
        loop {
            let mut request = {
                let mut record = self.record.lock();
                if record.sent {
                    record.dialog.increment_sequence();
                }
                record.sent = true;
                let builder = self
                    .ctx
                    .factory
                    .in_dialog(&record.dialog, Method::Subscribe)
                    .header(HeaderName::Expires, expiry.to_string());
                self.package.decorate(builder).build()
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
            if response.status == StatusCode::INTERVAL_TOO_BRIEF && !interval_raised {
                if let Some(min) = min_expires(&response) {
                    debug!("Subscription interval raised to {}s", min);
                    interval_raised = true;
                    expiry = min;
                    continue;
                }
            }
            return Ok((response, expiry));
        }
    }

    /// Terminates the subscription with `Expires: 0`.
    ///
    /// Returns whether the server acknowledged; the record is discarded
    /// either way.
    pub async fn unsubscribe(&self) -> bool {
        let _op = self.op.lock().await;
        self.cancel_refresh();
        let was_subscribed = {
            let mut record = self.record.lock();
            std::mem::replace(&mut record.subscribed, false)
        };
        if !was_subscribed {
            self.reset();
            return true;
        }

        let acknowledged = match self.exchange(0).await {
            Ok((response, _)) if response.status.is_success() => true,
            Ok((response, _)) => {
                debug!("Unsubscribe from {} answered {}", self.target, response.status);
                false
            }
            Err(e) => {
                warn!("Unsubscribe from {} failed: {}", self.target, e);
                false
            }
        };
        info!("Unsubscribed from {} of {}", self.package.name(), self.target);
        self.reset();
        acknowledged
    }

    /// Whether `notify` belongs to this subscription
    pub fn matches_notify(&self, notify: &Request) -> bool {
        let record = self.record.lock();
        notify.call_id() == Some(record.dialog.call_id())
            && notify.to_tag().as_deref() == Some(record.dialog.local_tag.as_str())
    }

    /// Answers a NOTIFY and hands its body to the notification handler.
    ///
    /// Returns `true` when the notifier ended the subscription.
    pub async fn on_notify(&self, notify: &Request, source: SocketAddr) -> bool {
        let state = notify
            .header(&HeaderName::SubscriptionState)
            .map(str::parse::<SubscriptionState>);
        let state = match state {
            Some(Ok(state)) => Some(state),
            Some(Err(e)) => {
                warn!("NOTIFY from {} with bad Subscription-State: {}", self.target, e);
                None
            }
            None => None,
        };

        let local_tag = {
            let mut record = self.record.lock();
            if record.dialog.remote_tag().is_none() {
                if let Some(tag) = notify.from_tag() {
                    record.dialog.set_remote_tag(tag);
                }
            }
            if let Some(cseq) = notify.cseq() {
                record.dialog.accept_remote_sequence(cseq.seq);
            }
            record.dialog.local_tag.clone()
        };
        let status = if state.is_some() {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        let response = self
            .ctx
            .factory
            .create_response(notify, status, Some(&local_tag))
            .build();
        if let Err(e) = self.ctx.transactions.send_response(response, source).await {
            warn!("Failed to answer NOTIFY from {}: {}", self.target, e);
        }

        let Some(state) = state else {
            return false;
        };
        self.handler.on_notification(&Notification {
            package: self.package.name().to_string(),
            from: notify.from_addr().map(|a| a.uri).unwrap_or_default(),
            state: state.clone(),
            content_type: notify.content_type().map(str::to_string),
            body: notify.body.clone(),
        });

        if state.is_terminated() {
            info!("{} subscription to {} terminated by notifier ({})", self.package.name(), self.target, state);
            self.cancel_refresh();
            self.reset();
            return true;
        }
        let mut record = self.record.lock();
        if let Some(expires) = state.expires() {
            record.expires_at = Some(Instant::now() + Duration::from_secs(u64::from(expires)));
        }
        record.state = Some(state);
        false
    }

    fn schedule_refresh(&self, delay: Duration) {
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = me.upgrade() else {
                return;
            };
            manager.refresh_now().await;
        });
        if let Some(previous) = self.refresh.lock().replace(task) {
            previous.abort();
        }
    }

    async fn refresh_now(&self) {
        let _op = self.op.lock().await;
        // this task's own handle; dropping it does not abort the task
        self.refresh.lock().take();
        let (subscribed, expiry) = {
            let record = self.record.lock();
            (record.subscribed, record.requested)
        };
        if !subscribed {
            return;
        }
        debug!("Refreshing {} subscription to {}", self.package.name(), self.target);
        self.subscribe_locked(expiry).await;
    }

    fn cancel_refresh(&self) {
        if let Some(task) = self.refresh.lock().take() {
            task.abort();
        }
    }

    /// Forgets the subscription; a later subscribe starts a new dialog
    fn reset(&self) {
        let mut record = self.record.lock();
        record.dialog = DialogPath::originating(
            generate_call_id(self.ctx.local_host()),
            self.ctx.identity.clone(),
            self.target.clone(),
            self.ctx.local_contact.clone(),
        );
        record.sent = false;
        record.subscribed = false;
        record.expires_at = None;
        record.state = None;
    }
}

impl Drop for SubscribeManager {
    fn drop(&mut self) {
        if let Some(task) = self.refresh.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SubscribeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeManager")
            .field("package", &self.package.name())
            .field("target", &self.target)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
