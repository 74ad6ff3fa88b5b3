//! Session timer (RFC 4028 subset)
//!
//! Once a session is established with a negotiated `Session-Expires`, one
//! side refreshes it and the other watches for refreshes:
//!
//! - refresher: sends UPDATE every half interval; 2xx keeps going, 405/501
//!   turns refreshing off, anything else ends the session
//! - refreshee: ends the session when no refresh arrived within a whole
//!   interval

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rcs_sip_core::parse_params;
use rcs_sip_core::find_param;

use super::session::ImsSession;
use crate::errors::SessionError;

/// Which side sends the refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresher {
    Local,
    Remote,
}

impl Refresher {
    /// Resolves a `refresher=` parameter. Without one the UAC refreshes.
    pub fn from_param(param: Option<&str>, local_is_uac: bool) -> Self {
        let uac_refreshes = !matches!(param, Some(p) if p.eq_ignore_ascii_case("uas"));
        if uac_refreshes == local_is_uac {
            Refresher::Local
        } else {
            Refresher::Remote
        }
    }

    /// Value of the `refresher=` parameter for this choice
    pub fn param(&self, local_is_uac: bool) -> &'static str {
        match (self, local_is_uac) {
            (Refresher::Local, true) | (Refresher::Remote, false) => "uac",
            _ => "uas",
        }
    }
}

/// Splits `1800;refresher=uac` into the interval and the refresher
pub fn parse_session_expires(value: &str) -> Option<(u32, Option<String>)> {
    let (secs, rest) = match value.find(';') {
        Some(i) => (&value[..i], &value[i..]),
        None => (value, ""),
    };
    let secs = secs.trim().parse().ok()?;
    let params = parse_params(rest);
    Some((secs, find_param(&params, "refresher").map(str::to_string)))
}

pub(crate) enum RefreshOutcome {
    Refreshed,
    /// The peer cannot handle UPDATE
    Unsupported,
    /// The session is no longer established
    Stopped,
    Failed(SessionError),
}

/// Runs the refresh or supervision loop of one session
#[derive(Debug)]
pub struct SessionTimerManager {
    interval: Duration,
    refresher: Refresher,
    task: JoinHandle<()>,
}

impl SessionTimerManager {
    pub(crate) fn start(session: Weak<ImsSession>, interval: Duration, refresher: Refresher) -> Self {
        debug!("Starting session timer: {:?} refresher, interval {:?}", refresher, interval);
        let task = match refresher {
            Refresher::Local => tokio::spawn(run_refresher(session, interval)),
            Refresher::Remote => tokio::spawn(run_refreshee(session, interval)),
        };
        Self {
            interval,
            refresher,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn refresher(&self) -> Refresher {
        self.refresher
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SessionTimerManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_refresher(session: Weak<ImsSession>, interval: Duration) {
    loop {
        tokio::time::sleep(interval / 2).await;
        let Some(session) = session.upgrade() else {
            return;
        };
        match session.refresh_session().await {
            RefreshOutcome::Refreshed => debug!("Session {} refreshed", session.call_id()),
            RefreshOutcome::Unsupported => {
                info!("Peer of {} does not accept UPDATE, refreshing disabled", session.call_id());
                return;
            }
            RefreshOutcome::Stopped => return,
            RefreshOutcome::Failed(error) => {
                warn!("Refresh of {} failed: {}", session.call_id(), error);
                // closing stops this timer, so it runs on its own task
                tokio::spawn(async move { session.expire(error).await });
                return;
            }
        }
    }
}

async fn run_refreshee(session: Weak<ImsSession>, interval: Duration) {
    loop {
        let deadline = match session.upgrade() {
            Some(session) => session.last_refresh() + interval,
            None => return,
        };
        tokio::time::sleep_until(deadline).await;

        let Some(session) = session.upgrade() else {
            return;
        };
        if session.last_refresh() + interval <= Instant::now() {
            warn!("No refresh of {} within {:?}", session.call_id(), interval);
            let error = SessionError::TransportTimeout(format!(
                "session {} not refreshed within {}s",
                session.call_id(),
                interval.as_secs()
            ));
            tokio::spawn(async move { session.expire(error).await });
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_expires() {
        assert_eq!(parse_session_expires("1800"), Some((1800, None)));
        assert_eq!(
            parse_session_expires("90;refresher=uas"),
            Some((90, Some("uas".to_string())))
        );
        assert_eq!(parse_session_expires("soon"), None);
    }

    #[test]
    fn test_refresher_resolution() {
        // default: the UAC refreshes
        assert_eq!(Refresher::from_param(None, true), Refresher::Local);
        assert_eq!(Refresher::from_param(None, false), Refresher::Remote);
        assert_eq!(Refresher::from_param(Some("uas"), false), Refresher::Local);
        assert_eq!(Refresher::from_param(Some("uac"), false), Refresher::Remote);

        assert_eq!(Refresher::Local.param(true), "uac");
        assert_eq!(Refresher::Local.param(false), "uas");
        assert_eq!(Refresher::Remote.param(false), "uac");
    }
}
