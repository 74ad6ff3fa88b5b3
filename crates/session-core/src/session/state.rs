//! Session lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a session stands
///
/// ```text
///          ┌─► InvitationSent ──► (ChallengeInProgress) ──┐
/// Idle ────┤                                              ├─► Established ─► Terminated
///          └─► InvitationReceived ────────────────────────┘
///
/// any state before Established ─► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, nothing sent or received yet
    Idle,
    /// Our INVITE is out, waiting for the final answer
    InvitationSent,
    /// The peer's INVITE is ringing, waiting for the local decision
    InvitationReceived,
    /// INVITE resent with credentials after a 401/407
    ChallengeInProgress,
    /// Offer/answer completed and acknowledged
    Established,
    /// Ended by BYE from either side
    Terminated,
    /// Failed, rejected or cancelled before establishment
    Aborted,
}

impl SessionState {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Aborted)
    }

    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established)
    }

    /// Still negotiating
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SessionState::InvitationSent
                | SessionState::InvitationReceived
                | SessionState::ChallengeInProgress
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, InvitationSent) | (Idle, InvitationReceived) => true,
            (InvitationSent, ChallengeInProgress) => true,
            (InvitationSent, Established)
            | (InvitationReceived, Established)
            | (ChallengeInProgress, Established) => true,
            (Established, Terminated) => true,
            (from, Aborted) => !from.is_terminal() && !from.is_established(),
            _ => false,
        }
    }

    pub fn valid_next_states(&self) -> Vec<SessionState> {
        use SessionState::*;

        [
            Idle,
            InvitationSent,
            InvitationReceived,
            ChallengeInProgress,
            Established,
            Terminated,
            Aborted,
        ]
        .into_iter()
        .filter(|next| self.can_transition_to(*next))
        .collect()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::InvitationSent => write!(f, "InvitationSent"),
            SessionState::InvitationReceived => write!(f, "InvitationReceived"),
            SessionState::ChallengeInProgress => write!(f, "ChallengeInProgress"),
            SessionState::Established => write!(f, "Established"),
            SessionState::Terminated => write!(f, "Terminated"),
            SessionState::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_path() {
        use SessionState::*;
        assert!(Idle.can_transition_to(InvitationSent));
        assert!(InvitationSent.can_transition_to(ChallengeInProgress));
        assert!(ChallengeInProgress.can_transition_to(Established));
        assert!(Established.can_transition_to(Terminated));
        assert!(!ChallengeInProgress.can_transition_to(ChallengeInProgress));
    }

    #[test]
    fn test_abort_only_before_establishment() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Aborted));
        assert!(InvitationReceived.can_transition_to(Aborted));
        assert!(!Established.can_transition_to(Aborted));
        assert!(!Terminated.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        assert!(SessionState::Terminated.valid_next_states().is_empty());
        assert!(SessionState::Aborted.valid_next_states().is_empty());
        assert_eq!(
            SessionState::Established.valid_next_states(),
            vec![SessionState::Terminated]
        );
    }
}
