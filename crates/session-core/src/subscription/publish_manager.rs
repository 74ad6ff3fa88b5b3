//! Event state publication (RFC 3903)
//!
//! Each PUBLISH is its own short exchange with a fresh Call-ID; only the
//! entity tag links a refresh to the state published before it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rcs_dialog_core::dialog::generate_call_id;
use rcs_dialog_core::{DigestClient, EventPackage};
use rcs_sip_core::{HeaderAccess, HeaderName, Method, Response, StatusCode};

use super::{is_challenge, min_expires};
use crate::errors::Result;
use crate::session::StackContext;

#[derive(Default)]
struct PublicationRecord {
    etag: Option<String>,
    published: bool,
    expires_at: Option<Instant>,
    content_type: Option<String>,
    body: Bytes,
}

pub struct PublishManager {
    ctx: Arc<StackContext>,
    package: Arc<dyn EventPackage>,
    auth: DigestClient,
    record: Mutex<PublicationRecord>,
    refresh: Mutex<Option<JoinHandle<()>>>,
    op: tokio::sync::Mutex<()>,
    me: Weak<PublishManager>,
}

impl PublishManager {
    pub fn new(ctx: Arc<StackContext>, package: Arc<dyn EventPackage>) -> Arc<Self> {
        let auth = DigestClient::new(ctx.credentials.clone());
        Arc::new_cyclic(|me| Self {
            ctx,
            package,
            auth,
            record: Mutex::new(PublicationRecord::default()),
            refresh: Mutex::new(None),
            op: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    /// Published and not yet expired
    pub fn is_published(&self) -> bool {
        let record = self.record.lock();
        record.published && record.expires_at.map_or(false, |at| at > Instant::now())
    }

    /// Entity tag of the current publication
    pub fn etag(&self) -> Option<String> {
        self.record.lock().etag.clone()
    }

    /// Publishes `body`, replacing what was published before
    pub async fn publish(&self, content_type: &str, body: impl Into<Bytes>) -> bool {
        let _op = self.op.lock().await;
        self.cancel_refresh();
        {
            let mut record = self.record.lock();
            record.content_type = Some(content_type.to_string());
            record.body = body.into();
        }
        self.publish_locked(true).await
    }

    async fn publish_locked(&self, with_body: bool) -> bool {
        let expiry = self.ctx.config.publish_expiry;
        let (response, asked) = match self.exchange(with_body, expiry).await {
            Ok(result) => result,
            Err(e) => {
                warn!("PUBLISH of {} failed: {}", self.package.name(), e);
                return false;
            }
        };

        if !response.status.is_success() {
            warn!(
                "PUBLISH of {} rejected: {} {}",
                self.package.name(),
                response.status,
                response.reason
            );
            let mut record = self.record.lock();
            record.published = false;
            record.etag = None;
            record.expires_at = None;
            return false;
        }

        let granted = response.expires().unwrap_or(asked);
        {
            let mut record = self.record.lock();
            if let Some(etag) = response.header(&HeaderName::SipETag) {
                record.etag = Some(etag.trim().to_string());
            }
            record.published = granted > 0;
            record.expires_at = Some(Instant::now() + Duration::from_secs(u64::from(granted)));
        }
        info!("Published {} for {}s", self.package.name(), granted);
        if granted > 0 {
            self.schedule_refresh(self.ctx.config.refresh_delay(granted));
        }
        true
    }

    /// One PUBLISH. Answers a single challenge and a single 423; a 412
    /// drops the entity tag and resends the full state once.
    async fn exchange(&self, mut with_body: bool, mut expiry: u32) -> Result<(Response, u32)> {
        let mut challenged = false;
        let mut interval_raised = false;
        let mut etag_dropped = false;
        loop {
            let (etag, content_type, body) = {
                let record = self.record.lock();
                (record.etag.clone(), record.content_type.clone(), record.body.clone())
            };
            let call_id = generate_call_id(self.ctx.local_host());
            let mut builder = self
                .ctx
                .factory
                .out_of_dialog(Method::Publish, &self.ctx.identity, self.ctx.local_party(), &call_id, 1)
                .header(HeaderName::Event, self.package.name())
                .header(HeaderName::Expires, expiry.to_string());
            if let Some(etag) = &etag {
                builder = builder.header(HeaderName::SipIfMatch, etag.as_str());
            }
            if with_body || etag.is_none() {
                if let Some(content_type) = &content_type {
                    builder = builder.content_type(content_type).body(body);
                }
            }
            let mut request = builder.build();
            self.auth.authorize(&mut request)?;
            let response = self
                .ctx
                .transactions
                .send_and_wait(request, self.ctx.transaction_timeout())
                .await?;

            let status = response.status;
            if is_challenge(status) && !challenged {
                challenged = true;
                self.auth.handle_challenge(&response)?;
                continue;
            }
            if status == StatusCode::INTERVAL_TOO_BRIEF && !interval_raised {
                if let Some(min) = min_expires(&response) {
                    debug!("Publication interval raised to {}s", min);
                    interval_raised = true;
                    expiry = min;
                    continue;
                }
            }
            if status == StatusCode::CONDITIONAL_REQUEST_FAILED && etag.is_some() && !etag_dropped && expiry > 0 {
                debug!("Entity tag {:?} unknown to the server, publishing in full", etag);
                etag_dropped = true;
                with_body = true;
                self.record.lock().etag = None;
                continue;
            }
            return Ok((response, expiry));
        }
    }

    /// Removes the publication with `Expires: 0`
    pub async fn unpublish(&self) -> bool {
        let _op = self.op.lock().await;
        self.cancel_refresh();
        let etag = self.record.lock().etag.clone();
        if etag.is_none() {
            *self.record.lock() = PublicationRecord::default();
            return true;
        }

        let acknowledged = match self.exchange(false, 0).await {
            Ok((response, _)) => response.status.is_success(),
            Err(e) => {
                warn!("Unpublish of {} failed: {}", self.package.name(), e);
                false
            }
        };
        info!("Unpublished {}", self.package.name());
        *self.record.lock() = PublicationRecord::default();
        acknowledged
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
        self.refresh.lock().take();
        if !self.record.lock().published {
            return;
        }
        debug!("Refreshing publication of {}", self.package.name());
        self.publish_locked(false).await;
    }

    fn cancel_refresh(&self) {
        if let Some(task) = self.refresh.lock().take() {
            task.abort();
        }
    }
}

impl Drop for PublishManager {
    fn drop(&mut self) {
        if let Some(task) = self.refresh.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for PublishManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishManager")
            .field("package", &self.package.name())
            .field("published", &self.is_published())
            .finish()
    }
}
