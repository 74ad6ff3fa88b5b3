//! # rcs-dialog-core
//!
//! Transaction and dialog layer of the RCS SIP stack.
//!
//! ## Overview
//!
//! Sits between the UDP transport and the session layer:
//!
//! - [`transaction`]: the transaction table and [`TransactionManager`], which
//!   give a `send_and_wait` call/response API over the asynchronous transport
//!   and forward new inbound requests upward
//! - [`dialog`]: [`DialogPath`], the identifiers and route set of one
//!   conversation, and [`RequestFactory`] for building in-dialog requests
//! - [`auth`]: HTTP Digest MD5 answers to 401/407 challenges
//! - [`subscription`]: event packages and the Subscription-State header
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rcs_dialog_core::prelude::*;
//! use rcs_sip_core::prelude::*;
//! use rcs_sip_transport::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let (transport, events) = bind_udp("0.0.0.0:5060".parse()?).await?;
//! let local = transport.local_addr()?;
//! let config = TransactionConfig::new("192.0.2.10:5060".parse()?);
//! let (manager, _incoming) = TransactionManager::new(Arc::new(transport), events, config);
//!
//! let factory = RequestFactory::new(local, "rcs-sip");
//! let options = factory
//!     .out_of_dialog(
//!         Method::Options,
//!         "sip:bob@ims.example.com",
//!         NameAddr::new("sip:alice@ims.example.com").with_tag(generate_tag()),
//!         &generate_call_id(&local.ip().to_string()),
//!         1,
//!     )
//!     .build();
//! let response = manager.send_and_wait(options, Duration::from_secs(32)).await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod dialog;
pub mod error;
pub mod subscription;
pub mod transaction;

pub use auth::{CredentialProvider, Credentials, DigestChallenge, DigestClient, StaticCredentials};
pub use dialog::{DialogPath, DialogState, RequestFactory};
pub use error::{DialogError, DialogResult, TransactionError, TransactionResult};
pub use subscription::{EventPackage, PresencePackage, SubscriptionState, WatcherInfoPackage};
pub use transaction::{
    IncomingRequest, PendingTransaction, TransactionConfig, TransactionEvent, TransactionKey,
    TransactionManager,
};

/// Re-export of common types
pub mod prelude {
    pub use crate::auth::{CredentialProvider, Credentials, DigestClient, StaticCredentials};
    pub use crate::dialog::{
        generate_branch, generate_call_id, generate_tag, DialogPath, DialogState, RequestFactory,
    };
    pub use crate::error::{DialogError, DialogResult, TransactionError, TransactionResult};
    pub use crate::subscription::{
        EventPackage, PresencePackage, SubscriptionState, WatcherInfoPackage,
    };
    pub use crate::transaction::{
        IncomingRequest, PendingTransaction, TransactionConfig, TransactionEvent, TransactionKey,
        TransactionManager,
    };
}
