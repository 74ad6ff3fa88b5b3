//! Stack configuration
//!
//! [`StackConfig`] is everything the coordinator needs at startup: where to
//! bind, which relay to use, who we are and how long to wait. Timer values
//! of the session layer live in [`SessionConfig`], which can also be read
//! from the provisioning [`SettingsStore`].

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use rcs_dialog_core::transaction::{DEFAULT_ACK_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT};
use rcs_dialog_core::TransactionConfig;
use rcs_sip_transport::{RetransmissionConfig, UdpTransportConfig, DEFAULT_CHANNEL_CAPACITY};

use crate::api::SettingsStore;

/// Settings keys read by [`SessionConfig::apply_settings`]
pub mod keys {
    pub const RINGING_PERIOD: &str = "RingingPeriod";
    pub const SUBSCRIBE_EXPIRE_PERIOD: &str = "SubscribeExpirePeriod";
    pub const PUBLISH_EXPIRE_PERIOD: &str = "PublishExpirePeriod";
    pub const SESSION_REFRESH_EXPIRE_PERIOD: &str = "SessionRefreshExpirePeriod";
    pub const MIN_SESSION_REFRESH_EXPIRE_PERIOD: &str = "MinSessionRefreshExpirePeriod";
}

/// Session layer timers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an invitation may ring before it is given up
    #[serde(with = "duration_secs")]
    pub ringing_timeout: Duration,
    /// Requested subscription duration, in seconds
    pub subscribe_expiry: u32,
    /// Requested publication duration, in seconds
    pub publish_expiry: u32,
    /// Share of the granted duration after which a refresh is sent
    pub refresh_fraction: f64,
    /// Session-Expires we ask for, in seconds; 0 disables session timers
    pub session_expires: u32,
    /// Smallest session interval we accept, in seconds
    pub min_session_expires: u32,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ringing_timeout: Duration::from_secs(30),
            subscribe_expiry: 3600,
            publish_expiry: 3600,
            refresh_fraction: 0.5,
            session_expires: 1800,
            min_session_expires: 90,
            user_agent: format!("rcs-sip/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by whatever the settings store provides
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        let mut config = Self::default();
        config.apply_settings(settings);
        config
    }

    /// Overrides the timers present in `settings`. Unparseable values are
    /// logged and ignored.
    pub fn apply_settings(&mut self, settings: &dyn SettingsStore) {
        if let Some(secs) = read_u32(settings, keys::RINGING_PERIOD) {
            self.ringing_timeout = Duration::from_secs(u64::from(secs));
        }
        if let Some(secs) = read_u32(settings, keys::SUBSCRIBE_EXPIRE_PERIOD) {
            self.subscribe_expiry = secs;
        }
        if let Some(secs) = read_u32(settings, keys::PUBLISH_EXPIRE_PERIOD) {
            self.publish_expiry = secs;
        }
        if let Some(secs) = read_u32(settings, keys::SESSION_REFRESH_EXPIRE_PERIOD) {
            self.session_expires = secs;
        }
        if let Some(secs) = read_u32(settings, keys::MIN_SESSION_REFRESH_EXPIRE_PERIOD) {
            self.min_session_expires = secs;
        }
    }

    pub fn with_ringing_timeout(mut self, timeout: Duration) -> Self {
        self.ringing_timeout = timeout;
        self
    }

    pub fn with_subscribe_expiry(mut self, secs: u32) -> Self {
        self.subscribe_expiry = secs;
        self
    }

    pub fn with_publish_expiry(mut self, secs: u32) -> Self {
        self.publish_expiry = secs;
        self
    }

    pub fn with_refresh_fraction(mut self, fraction: f64) -> Self {
        self.refresh_fraction = fraction;
        self
    }

    pub fn with_session_expires(mut self, secs: u32, min_secs: u32) -> Self {
        self.session_expires = secs;
        self.min_session_expires = min_secs;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Delay before refreshing something granted for `granted_secs`.
    ///
    /// Never later than the grant itself; fractions outside `(0, 1]` fall
    /// back to one half.
    pub fn refresh_delay(&self, granted_secs: u32) -> Duration {
        let fraction = if self.refresh_fraction > 0.0 && self.refresh_fraction <= 1.0 {
            self.refresh_fraction
        } else {
            0.5
        };
        Duration::from_secs(u64::from(granted_secs)).mul_f64(fraction)
    }
}

fn read_u32(settings: &dyn SettingsStore, key: &str) -> Option<u32> {
    let value = settings.get(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring setting {}={:?}: not a number of seconds", key, value);
            None
        }
    }
}

/// Everything the coordinator is built from
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Local UDP endpoint; port 0 picks an ephemeral port
    pub local_addr: SocketAddr,
    /// Every request leaves through this relay
    pub outbound_proxy: SocketAddr,
    /// Our public identity, e.g. `sip:+33600000000@ims.example.com`
    pub identity: String,
    /// Digest username; defaults to the identity's user part
    pub username: Option<String>,
    pub password: Option<String>,
    pub retransmission: RetransmissionConfig,
    pub channel_capacity: usize,
    pub transaction_timeout: Duration,
    pub ack_timeout: Duration,
    pub session: SessionConfig,
}

impl StackConfig {
    pub fn new(local_addr: SocketAddr, outbound_proxy: SocketAddr, identity: impl Into<String>) -> Self {
        Self {
            local_addr,
            outbound_proxy,
            identity: identity.into(),
            username: None,
            password: None,
            retransmission: RetransmissionConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            session: SessionConfig::default(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_retransmission(mut self, retransmission: RetransmissionConfig) -> Self {
        self.retransmission = retransmission;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// User part of the identity (`alice` in `sip:alice@example.com`)
    pub fn user(&self) -> &str {
        user_part(&self.identity)
    }

    pub fn transport_config(&self) -> UdpTransportConfig {
        UdpTransportConfig::new(self.local_addr)
            .with_channel_capacity(self.channel_capacity)
            .with_retransmission(self.retransmission.clone())
    }

    pub fn transaction_config(&self) -> TransactionConfig {
        TransactionConfig::new(self.outbound_proxy)
            .with_transaction_timeout(self.transaction_timeout)
            .with_ack_timeout(self.ack_timeout)
            .with_user_agent(self.session.user_agent.clone())
    }
}

pub(crate) fn user_part(uri: &str) -> &str {
    let rest = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))
        .or_else(|| uri.strip_prefix("tel:"))
        .unwrap_or(uri);
    let user = rest.split('@').next().unwrap_or(rest);
    user.split(';').next().unwrap_or(user)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_override_defaults() {
        let mut settings = HashMap::new();
        settings.insert(keys::RINGING_PERIOD.to_string(), "45".to_string());
        settings.insert(keys::SUBSCRIBE_EXPIRE_PERIOD.to_string(), "600".to_string());
        settings.insert(keys::PUBLISH_EXPIRE_PERIOD.to_string(), "soon".to_string());

        let config = SessionConfig::from_settings(&settings);
        assert_eq!(config.ringing_timeout, Duration::from_secs(45));
        assert_eq!(config.subscribe_expiry, 600);
        assert_eq!(config.publish_expiry, 3600);
        assert_eq!(config.session_expires, 1800);
    }

    #[test]
    fn test_refresh_delay_uses_fraction() {
        let config = SessionConfig::default();
        assert_eq!(config.refresh_delay(3600), Duration::from_secs(1800));
        let config = config.with_refresh_fraction(0.8);
        assert_eq!(config.refresh_delay(100), Duration::from_secs(80));
        let config = config.with_refresh_fraction(1.5);
        assert_eq!(config.refresh_delay(100), Duration::from_secs(50));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"ringing_timeout": 10, "refresh_fraction": 0.75}"#).unwrap();
        assert_eq!(config.ringing_timeout, Duration::from_secs(10));
        assert_eq!(config.refresh_fraction, 0.75);
        assert_eq!(config.subscribe_expiry, 3600);
    }

    #[test]
    fn test_user_part() {
        assert_eq!(user_part("sip:alice@example.com"), "alice");
        assert_eq!(user_part("tel:+33600000000"), "+33600000000");
        assert_eq!(user_part("sip:+336;phone-context=x@ims.net"), "+336");
    }

    #[test]
    fn test_stack_config_derives_layer_configs() {
        let config = StackConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:5060".parse().unwrap(),
            "sip:alice@example.com",
        )
        .with_transaction_timeout(Duration::from_secs(5));
        assert_eq!(config.user(), "alice");
        assert_eq!(config.transaction_config().transaction_timeout, Duration::from_secs(5));
        assert_eq!(config.transport_config().retransmission, RetransmissionConfig::default());
    }
}
