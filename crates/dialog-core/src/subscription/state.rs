//! The Subscription-State header

use std::fmt;
use std::str::FromStr;

use rcs_sip_core::{find_param, parse_params};

use crate::error::DialogError;

/// Value of `Subscription-State`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Active { expires: Option<u32> },
    Pending { expires: Option<u32> },
    Terminated { reason: Option<String> },
}

impl SubscriptionState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SubscriptionState::Terminated { .. })
    }

    /// Remaining duration announced by the notifier
    pub fn expires(&self) -> Option<u32> {
        match self {
            SubscriptionState::Active { expires } | SubscriptionState::Pending { expires } => *expires,
            SubscriptionState::Terminated { .. } => None,
        }
    }
}

impl FromStr for SubscriptionState {
    type Err = DialogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, rest) = match s.find(';') {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, ""),
        };
        let params = parse_params(rest);
        let expires = find_param(&params, "expires").and_then(|e| e.parse().ok());
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionState::Active { expires }),
            "pending" => Ok(SubscriptionState::Pending { expires }),
            "terminated" => Ok(SubscriptionState::Terminated {
                reason: find_param(&params, "reason").map(str::to_string),
            }),
            other => Err(DialogError::ProtocolError(format!(
                "unknown subscription state '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Active { expires: Some(e) } => write!(f, "active;expires={}", e),
            SubscriptionState::Active { expires: None } => write!(f, "active"),
            SubscriptionState::Pending { expires: Some(e) } => write!(f, "pending;expires={}", e),
            SubscriptionState::Pending { expires: None } => write!(f, "pending"),
            SubscriptionState::Terminated { reason: Some(r) } => write!(f, "terminated;reason={}", r),
            SubscriptionState::Terminated { reason: None } => write!(f, "terminated"),
        }
    }
}
