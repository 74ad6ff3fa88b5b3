//! Event packages for SUBSCRIBE/NOTIFY (RFC 6665)
//!
//! A package names the `Event` header value and the bodies a watcher
//! accepts in NOTIFY.

use std::time::Duration;

use rcs_sip_core::{HeaderName, SimpleRequestBuilder};

/// Trait for SIP event packages
pub trait EventPackage: Send + Sync + std::fmt::Debug {
    /// Value of the Event header
    fn name(&self) -> &str;

    /// Content types listed in Accept
    fn accept_types(&self) -> Vec<&'static str>;

    /// Subscription duration when the caller does not pick one
    fn default_expires(&self) -> Duration {
        Duration::from_secs(3600)
    }

    /// Whether resource lists (RFC 4662) are accepted
    fn supports_event_lists(&self) -> bool {
        false
    }

    /// Adds Event, Accept and Supported to a SUBSCRIBE
    fn decorate(&self, builder: SimpleRequestBuilder) -> SimpleRequestBuilder {
        let builder = builder
            .header(HeaderName::Event, self.name())
            .header(HeaderName::Accept, self.accept_types().join(", "));
        if self.supports_event_lists() {
            builder.header(HeaderName::Supported, "eventlist")
        } else {
            builder
        }
    }
}

/// Presence event package (RFC 3856) with resource lists
#[derive(Debug, Clone, Copy, Default)]
pub struct PresencePackage;

impl EventPackage for PresencePackage {
    fn name(&self) -> &str {
        "presence"
    }

    fn accept_types(&self) -> Vec<&'static str> {
        vec![
            "application/pidf+xml",
            "application/rlmi+xml",
            "multipart/related",
        ]
    }

    fn supports_event_lists(&self) -> bool {
        true
    }
}

/// Watcher information package (RFC 3857)
#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherInfoPackage;

impl EventPackage for WatcherInfoPackage {
    fn name(&self) -> &str {
        "presence.winfo"
    }

    fn accept_types(&self) -> Vec<&'static str> {
        vec!["application/watcherinfo+xml"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_sip_core::prelude::*;

    #[test]
    fn test_presence_decoration() {
        let request = PresencePackage
            .decorate(SimpleRequestBuilder::new(Method::Subscribe, "sip:bob@example.com"))
            .build();
        assert_eq!(request.header(&HeaderName::Event), Some("presence"));
        assert_eq!(
            request.header(&HeaderName::Accept),
            Some("application/pidf+xml, application/rlmi+xml, multipart/related")
        );
        assert_eq!(request.header(&HeaderName::Supported), Some("eventlist"));
    }

    #[test]
    fn test_winfo_has_no_eventlist() {
        let request = WatcherInfoPackage
            .decorate(SimpleRequestBuilder::new(Method::Subscribe, "sip:alice@example.com"))
            .build();
        assert_eq!(request.header(&HeaderName::Event), Some("presence.winfo"));
        assert!(request.header(&HeaderName::Supported).is_none());
    }
}
