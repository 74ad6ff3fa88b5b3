//! SIP event subscription support (RFC 6665)

pub mod event_package;
pub mod state;

pub use event_package::{EventPackage, PresencePackage, WatcherInfoPackage};
pub use state::SubscriptionState;
