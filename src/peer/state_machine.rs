//! The Peer friendship state machine.
//!
//! Implemented as an explicit `(state, event) -> state` table plus a bounded
//! transition log, per the design notes in spec.md §9 ("Do not encode them
//! as ad-hoc control flow"). Connection status is tracked separately from
//! friendship state: a `disconnect` on a `Befriended` peer does not change
//! its friendship state, only its connection flag (spec.md §4.1).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PeerError;

/// Default length of a peer's bounded transition log (spec.md §3).
pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FriendshipState {
    Default,
    ProbeSent,
    ProbeReceived,
    BefriendAccepted,
    Befriended,
    Rejected,
    UnfriendSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FriendshipEvent {
    Probe,
    ProbeRecv,
    Accept,
    Reject,
    Remove,
    Update,
    Connect,
    Disconnect,
    NewName,
    ProbeUnfriend,
    InitFriendship,
}

/// One entry in a peer's bounded transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub old_state: FriendshipState,
    pub event: FriendshipEvent,
    pub new_state: FriendshipState,
    pub at: DateTime<Utc>,
}

/// The static `(state, event) -> state` table. `Connect`/`Disconnect` and
/// `NewName` are handled outside the table: they mutate connection status or
/// hostname without a friendship-state change, so they always "succeed" but
/// are logged as a same-state transition for audit purposes.
fn table_lookup(state: FriendshipState, event: FriendshipEvent) -> Option<FriendshipState> {
    use FriendshipEvent::*;
    use FriendshipState::*;
    match (state, event) {
        (Default, Probe) => Some(ProbeSent),
        (Default, ProbeRecv) => Some(ProbeReceived),
        (ProbeSent, Accept) => Some(BefriendAccepted),
        (ProbeSent, Reject) => Some(Rejected),
        (ProbeReceived, InitFriendship) => Some(Befriended),
        (ProbeReceived, Reject) => Some(Rejected),
        (BefriendAccepted, Update) => Some(Befriended),
        (BefriendAccepted, InitFriendship) => Some(Befriended),
        (Befriended, ProbeUnfriend) => Some(UnfriendSent),
        (UnfriendSent, Remove) => Some(Default),
        (Rejected, Remove) => Some(Default),
        (Rejected, Probe) => Some(ProbeSent),
        // Connect/Disconnect/NewName/Update never change friendship state by
        // themselves outside the transitions named above; callers that fire
        // them on an unlisted (state, event) pair get a same-state no-op.
        (s, Connect) | (s, Disconnect) | (s, NewName) => Some(s),
        _ => None,
    }
}

/// A bounded, circular log of friendship-state transitions. The
/// authoritative form of the Peer SM's history (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLog {
    capacity: usize,
    entries: VecDeque<Transition>,
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl TransitionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, t: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(t);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drives one `(state, event)` step, appending to `log` and returning the
/// new state. Fails on a transition the table does not recognize.
pub fn advance(
    state: FriendshipState,
    event: FriendshipEvent,
    log: &mut TransitionLog,
) -> Result<FriendshipState, PeerError> {
    let new_state = table_lookup(state, event).ok_or(PeerError::InvalidTransition {
        state,
        event,
    })?;
    log.push(Transition {
        old_state: state,
        event,
        new_state,
        at: Utc::now(),
    });
    Ok(new_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_then_accept_reaches_befriend_accepted() {
        let mut log = TransitionLog::new(4);
        let s = advance(FriendshipState::Default, FriendshipEvent::Probe, &mut log).unwrap();
        assert_eq!(s, FriendshipState::ProbeSent);
        let s = advance(s, FriendshipEvent::Accept, &mut log).unwrap();
        assert_eq!(s, FriendshipState::BefriendAccepted);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn disconnect_does_not_change_befriended_state() {
        let mut log = TransitionLog::new(4);
        let s = advance(
            FriendshipState::Befriended,
            FriendshipEvent::Disconnect,
            &mut log,
        )
        .unwrap();
        assert_eq!(s, FriendshipState::Befriended);
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut log = TransitionLog::new(4);
        let err = advance(FriendshipState::Default, FriendshipEvent::Accept, &mut log);
        assert!(err.is_err());
    }

    #[test]
    fn log_is_bounded() {
        let mut log = TransitionLog::new(2);
        let mut s = FriendshipState::Default;
        s = advance(s, FriendshipEvent::Probe, &mut log).unwrap();
        s = advance(s, FriendshipEvent::Accept, &mut log).unwrap();
        let _ = advance(s, FriendshipEvent::Update, &mut log).unwrap();
        assert_eq!(log.len(), 2);
    }
}
