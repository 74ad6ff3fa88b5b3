//! Core ImsCoordinator structure and initialization

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rcs_dialog_core::dialog::generate_call_id;
use rcs_dialog_core::{
    CredentialProvider, DigestClient, EventPackage, IncomingRequest, PresencePackage, StaticCredentials,
    TransactionManager,
};
use rcs_sip_core::Method;
use rcs_sip_transport::{Transport, UdpTransport};

use crate::api::{
    IncomingSessionHandler, LoggingNotificationHandler, MediaHandler, MemoryMessageStore, MessageStore,
    NoopMediaHandler, NotificationHandler, RejectAllHandler, SessionDirection, SessionInfo,
    SessionListener, SettingsStore, StoredMessage,
};
use crate::config::StackConfig;
use crate::errors::{Result, SessionError};
use crate::feature::{DefaultFeatureFactory, FeatureFactory, FeatureKind, SessionFeature};
use crate::session::session::is_challenge;
use crate::session::{ImsSession, SessionHandle, StackContext};
use crate::subscription::{PublishManager, SubscribeManager};

/// How long shutdown waits for sessions to finish hanging up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Owns the stack and routes inbound requests to sessions and subscriptions
pub struct ImsCoordinator {
    pub(super) ctx: Arc<StackContext>,
    pub(super) sessions: Arc<DashMap<String, Arc<ImsSession>>>,
    /// Keyed by event package and target
    pub(super) subscriptions: DashMap<(String, String), Arc<SubscribeManager>>,
    publisher: Arc<PublishManager>,

    /// Coordinator-wide listeners, added to every session
    listeners: Vec<Arc<dyn SessionListener>>,
    /// Drops finished sessions from the map
    reaper: Arc<dyn SessionListener>,

    pub(super) incoming_handler: Arc<dyn IncomingSessionHandler>,
    pub(super) feature_factory: Arc<dyn FeatureFactory>,
    pub(super) message_store: Arc<dyn MessageStore>,
    notification_handler: Arc<dyn NotificationHandler>,

    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ImsCoordinator {
    pub fn builder(config: StackConfig) -> ImsCoordinatorBuilder {
        ImsCoordinatorBuilder::new(config)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.ctx.transactions.local_addr()?)
    }

    pub fn identity(&self) -> &str {
        &self.ctx.identity
    }

    pub fn context(&self) -> &Arc<StackContext> {
        &self.ctx
    }

    pub(super) fn register(&self, session: &Arc<ImsSession>) {
        for listener in &self.listeners {
            session.add_listener(listener);
        }
        session.add_listener(&self.reaper);
        self.sessions.insert(session.call_id().to_string(), session.clone());
    }

    // Sessions

    /// Starts a session of `feature` with `target`.
    ///
    /// The INVITE goes out in the background; follow progress through the
    /// handle or the listeners.
    pub async fn create_session(&self, feature: Arc<dyn SessionFeature>, target: &str) -> Result<SessionHandle> {
        let session = ImsSession::outgoing(self.ctx.clone(), feature, target);
        self.register(&session);

        let runner = session.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.start().await {
                debug!("Session {} did not establish: {}", runner.call_id(), e);
            }
        });
        Ok(SessionHandle::new(session))
    }

    /// Starts a session of `kind` with the feature the factory provides
    pub async fn create_session_of_kind(&self, kind: FeatureKind, target: &str) -> Result<SessionHandle> {
        let feature = self
            .feature_factory
            .for_kind(kind)
            .ok_or_else(|| SessionError::unsupported(format!("no {} feature", kind)))?;
        self.create_session(feature, target).await
    }

    pub fn accept(&self, handle: &SessionHandle) -> Result<()> {
        handle.accept()
    }

    pub fn reject(&self, handle: &SessionHandle) -> Result<()> {
        handle.reject()
    }

    pub async fn terminate(&self, handle: &SessionHandle) -> Result<()> {
        handle.terminate().await
    }

    /// Live session with this Call-ID
    pub fn session(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(call_id)
            .map(|entry| SessionHandle::new(entry.value().clone()))
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| SessionHandle::new(entry.value().clone()))
            .collect()
    }

    // Subscriptions

    /// Subscribes to `package` events of `target`, reusing an existing
    /// subscription to the same resource. `None` uses the configured expiry.
    pub async fn subscribe(&self, package: Arc<dyn EventPackage>, target: &str, expiry: Option<u32>) -> bool {
        let manager = self
            .subscriptions
            .entry((package.name().to_string(), target.to_string()))
            .or_insert_with(|| {
                SubscribeManager::new(
                    self.ctx.clone(),
                    package,
                    target,
                    self.notification_handler.clone(),
                )
            })
            .value()
            .clone();
        manager
            .subscribe(expiry.unwrap_or(self.ctx.config.subscribe_expiry))
            .await
    }

    /// Ends the subscription to `package` events of `target`
    pub async fn unsubscribe(&self, package_name: &str, target: &str) -> bool {
        let key = (package_name.to_string(), target.to_string());
        let Some((_, manager)) = self.subscriptions.remove(&key) else {
            return false;
        };
        manager.unsubscribe().await
    }

    pub fn subscription(&self, package_name: &str, target: &str) -> Option<Arc<SubscribeManager>> {
        self.find_subscription(package_name, target)
    }

    fn find_subscription(&self, package_name: &str, target: &str) -> Option<Arc<SubscribeManager>> {
        self.subscriptions
            .get(&(package_name.to_string(), target.to_string()))
            .map(|entry| entry.value().clone())
    }

    // Publication

    pub async fn publish(&self, content_type: &str, body: impl Into<Bytes>) -> bool {
        self.publisher.publish(content_type, body).await
    }

    pub async fn unpublish(&self) -> bool {
        self.publisher.unpublish().await
    }

    pub fn publisher(&self) -> &Arc<PublishManager> {
        &self.publisher
    }

    // Pager mode

    /// Sends one MESSAGE outside any dialog
    pub async fn send_instant_message(&self, target: &str, content_type: &str, body: impl Into<Bytes>) -> bool {
        let body = body.into();
        let auth = DigestClient::new(self.ctx.credentials.clone());
        let call_id = generate_call_id(self.ctx.local_host());
        let from = self.ctx.local_party();

        let mut seq = 1;
        let mut challenged = false;
        loop {
            let mut request = self
                .ctx
                .factory
                .out_of_dialog(Method::Message, target, from.clone(), &call_id, seq)
                .content_type(content_type)
                .body(body.clone())
                .build();
            if let Err(e) = auth.authorize(&mut request) {
                warn!("Cannot authorize MESSAGE to {}: {}", target, e);
                return false;
            }
            let response = match self
                .ctx
                .transactions
                .send_and_wait(request, self.ctx.transaction_timeout())
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("MESSAGE to {} failed: {}", target, e);
                    return false;
                }
            };

            if is_challenge(response.status) && !challenged {
                challenged = true;
                seq += 1;
                if let Err(e) = auth.handle_challenge(&response) {
                    warn!("MESSAGE to {} challenged: {}", target, e);
                    return false;
                }
                continue;
            }
            if !response.status.is_success() {
                warn!("MESSAGE to {} rejected: {} {}", target, response.status, response.reason);
                return false;
            }

            debug!("MESSAGE to {} delivered ({})", target, response.status);
            self.message_store.store_message(StoredMessage {
                direction: SessionDirection::Outgoing,
                peer: target.to_string(),
                call_id,
                content_type: content_type.to_string(),
                body,
            });
            return true;
        }
    }

    // Lifecycle

    pub(super) fn start_dispatch(self: &Arc<Self>, incoming: mpsc::Receiver<IncomingRequest>) {
        let handle = tokio::spawn(run_dispatch(Arc::downgrade(self), incoming));
        *self.dispatch_handle.lock() = Some(handle);
    }

    /// Terminates every session, ends subscriptions and the publication,
    /// then closes the transport
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down IMS coordinator");

        let sessions: Vec<Arc<ImsSession>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let results = join_all(sessions.iter().map(|session| session.terminate())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to terminate session {}: {}", session.call_id(), e);
            }
        }
        let ended = join_all(sessions.iter().map(|session| session.ended()));
        if tokio::time::timeout(SHUTDOWN_GRACE, ended).await.is_err() {
            warn!("Sessions still ending at shutdown");
        }

        let subscriptions: Vec<Arc<SubscribeManager>> =
            self.subscriptions.iter().map(|e| e.value().clone()).collect();
        self.subscriptions.clear();
        join_all(subscriptions.iter().map(|manager| manager.unsubscribe())).await;
        self.publisher.unpublish().await;

        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }
        self.sessions.clear();
        self.ctx.transactions.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for ImsCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsCoordinator")
            .field("identity", &self.ctx.identity)
            .field("sessions", &self.sessions.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

async fn run_dispatch(coordinator: Weak<ImsCoordinator>, mut incoming: mpsc::Receiver<IncomingRequest>) {
    while let Some(IncomingRequest { request, source }) = incoming.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.dispatch(request, source);
    }
    debug!("Dispatch loop ended");
}

/// Forgets sessions once they are over
struct SessionReaper {
    sessions: Weak<DashMap<String, Arc<ImsSession>>>,
}

impl SessionReaper {
    fn reap(&self, session: &SessionInfo) {
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove(&session.call_id);
        }
    }
}

impl SessionListener for SessionReaper {
    fn on_error(&self, session: &SessionInfo, _error: &SessionError) {
        self.reap(session);
    }

    fn on_terminated(&self, session: &SessionInfo) {
        self.reap(session);
    }
}

/// Builder for [`ImsCoordinator`]
pub struct ImsCoordinatorBuilder {
    config: StackConfig,
    listeners: Vec<Arc<dyn SessionListener>>,
    incoming_handler: Option<Arc<dyn IncomingSessionHandler>>,
    feature_factory: Option<Arc<dyn FeatureFactory>>,
    notification_handler: Option<Arc<dyn NotificationHandler>>,
    message_store: Option<Arc<dyn MessageStore>>,
    media_handler: Option<Arc<dyn MediaHandler>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    publish_package: Arc<dyn EventPackage>,
}

impl ImsCoordinatorBuilder {
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
            incoming_handler: None,
            feature_factory: None,
            notification_handler: None,
            message_store: None,
            media_handler: None,
            credentials: None,
            publish_package: Arc::new(PresencePackage),
        }
    }

    /// Adds a listener to every session
    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Decides on inbound invitations; all are rejected without one
    pub fn with_incoming_handler(mut self, handler: Arc<dyn IncomingSessionHandler>) -> Self {
        self.incoming_handler = Some(handler);
        self
    }

    pub fn with_feature_factory(mut self, factory: Arc<dyn FeatureFactory>) -> Self {
        self.feature_factory = Some(factory);
        self
    }

    pub fn with_notification_handler(mut self, handler: Arc<dyn NotificationHandler>) -> Self {
        self.notification_handler = Some(handler);
        self
    }

    pub fn with_message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.message_store = Some(store);
        self
    }

    pub fn with_media_handler(mut self, handler: Arc<dyn MediaHandler>) -> Self {
        self.media_handler = Some(handler);
        self
    }

    /// Replaces the credentials derived from the config
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Overrides session timers from the provisioning settings
    pub fn with_settings(mut self, settings: &dyn SettingsStore) -> Self {
        self.config.session.apply_settings(settings);
        self
    }

    /// Event package of the publication (presence by default)
    pub fn with_publish_package(mut self, package: Arc<dyn EventPackage>) -> Self {
        self.publish_package = package;
        self
    }

    /// Binds the transport and starts dispatching inbound requests
    pub async fn build(self) -> Result<Arc<ImsCoordinator>> {
        let config = self.config;
        let (transport, events) = UdpTransport::bind_with_config(config.transport_config()).await?;
        info!(
            "IMS stack for {} listening on {} via {}",
            config.identity,
            transport.local_addr()?,
            config.outbound_proxy
        );
        let (transactions, incoming) =
            TransactionManager::new(Arc::new(transport), events, config.transaction_config());

        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(StaticCredentials::new(
                config.identity.clone(),
                config.username.clone().unwrap_or_else(|| config.user().to_string()),
                config.password.clone().unwrap_or_default(),
            ))
        });
        let media = self
            .media_handler
            .unwrap_or_else(|| Arc::new(NoopMediaHandler));
        let ctx = Arc::new(StackContext::new(transactions, credentials, media, config.session.clone())?);

        let sessions = Arc::new(DashMap::new());
        let reaper: Arc<dyn SessionListener> = Arc::new(SessionReaper {
            sessions: Arc::downgrade(&sessions),
        });
        let coordinator = Arc::new(ImsCoordinator {
            publisher: PublishManager::new(ctx.clone(), self.publish_package),
            ctx,
            sessions,
            subscriptions: DashMap::new(),
            listeners: self.listeners,
            reaper,
            incoming_handler: self
                .incoming_handler
                .unwrap_or_else(|| Arc::new(RejectAllHandler)),
            feature_factory: self
                .feature_factory
                .unwrap_or_else(|| Arc::new(DefaultFeatureFactory::default())),
            message_store: self
                .message_store
                .unwrap_or_else(|| Arc::new(MemoryMessageStore::new())),
            notification_handler: self
                .notification_handler
                .unwrap_or_else(|| Arc::new(LoggingNotificationHandler)),
            dispatch_handle: Mutex::new(None),
        });
        coordinator.start_dispatch(incoming);
        Ok(coordinator)
    }
}
