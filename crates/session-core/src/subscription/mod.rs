//! Recurring handshakes: subscriptions and publications

pub mod publish_manager;
pub mod subscribe_manager;

pub use publish_manager::PublishManager;
pub use subscribe_manager::SubscribeManager;

use rcs_sip_core::{HeaderAccess, HeaderName, Response};

pub(crate) use crate::session::session::is_challenge;

/// Min-Expires of a 423 answer
pub(crate) fn min_expires(response: &Response) -> Option<u32> {
    response.header(&HeaderName::MinExpires)?.trim().parse().ok()
}
