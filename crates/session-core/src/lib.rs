//! # rcs-session-core
//!
//! Session layer of the RCS SIP stack.
//!
//! ## Overview
//!
//! - [`coordinator`]: [`ImsCoordinator`], the entry point. It binds the
//!   transport, dispatches inbound requests and hands out sessions.
//! - [`session`]: the INVITE session state machine shared by every feature,
//!   with RFC 4028 session timers
//! - [`feature`]: offer/answer behaviour of chat, video share and voice call
//! - [`subscription`]: SUBSCRIBE/NOTIFY and PUBLISH with automatic refresh
//! - [`api`]: listener, handler and collaborator traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rcs_session_core::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = StackConfig::new(
//!     "0.0.0.0:0".parse()?,
//!     "192.0.2.10:5060".parse()?,
//!     "sip:alice@ims.example.com",
//! )
//! .with_credentials("alice", "secret");
//!
//! let coordinator = ImsCoordinator::builder(config)
//!     .with_incoming_handler(Arc::new(AutoAcceptHandler))
//!     .build()
//!     .await?;
//!
//! let chat = coordinator
//!     .create_session_of_kind(FeatureKind::Chat, "sip:bob@ims.example.com")
//!     .await?;
//! if chat.settled().await == SessionState::Established {
//!     chat.terminate().await?;
//! }
//! coordinator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod feature;
pub mod sdp;
pub mod session;
pub mod subscription;

pub use config::{SessionConfig, StackConfig};
pub use coordinator::{ImsCoordinator, ImsCoordinatorBuilder};
pub use errors::{CancelReason, Result, SessionError};
pub use feature::{FeatureFactory, FeatureKind, SessionFeature};
pub use session::{SessionHandle, SessionState};

/// Re-export of common types
pub mod prelude {
    pub use crate::api::{
        AutoAcceptHandler, IncomingSessionHandler, LoggingListener, LoggingNotificationHandler,
        MediaHandler, MemoryMessageStore, MessageStore, NoopMediaHandler, Notification,
        NotificationHandler, RejectAllHandler, SessionDirection, SessionId, SessionInfo,
        SessionListener, SettingsStore, StoredMessage,
    };
    pub use crate::config::{SessionConfig, StackConfig};
    pub use crate::coordinator::{ImsCoordinator, ImsCoordinatorBuilder};
    pub use crate::errors::{CancelReason, Result, SessionError};
    pub use crate::feature::{
        ChatFeature, Codec, DefaultFeatureFactory, FeatureFactory, FeatureKind, MediaShareFeature,
        SessionFeature, VoiceCallFeature,
    };
    pub use crate::sdp::SessionDescription;
    pub use crate::session::{ListenerId, SessionHandle, SessionState};
    pub use crate::subscription::{PublishManager, SubscribeManager};
    pub use rcs_dialog_core::{EventPackage, PresencePackage, WatcherInfoPackage};
}
