//! The Op-SM's `(phase, event) -> phase` table and bounded transition log
//! (spec.md §4.6 "Lifecycle"; §9 design notes: "implement them as an
//! explicit table... do not encode them as ad-hoc control flow").
//!
//! Unlike the Peer SM, every path through this table is linear and
//! terminates: a rejection in any phase moves straight to `Aborted`, from
//! which the only outbound edge is `Unlock` (spec.md: "any rejection
//! aborts... the SM goes to UNLOCK").

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::OpError;

pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpPhase {
    Idle,
    Locked,
    Staged,
    Committed,
    Aborted,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpEvent {
    LockOk,
    LockReject,
    StageOk,
    StageReject,
    CommitDone,
    Unlock,
    Timeout,
}

fn table_lookup(phase: OpPhase, event: OpEvent) -> Option<OpPhase> {
    use OpEvent::*;
    use OpPhase::*;
    match (phase, event) {
        (Idle, LockOk) => Some(Locked),
        (Idle, LockReject) => Some(Aborted),
        (Locked, StageOk) => Some(Staged),
        (Locked, StageReject) => Some(Aborted),
        (Staged, CommitDone) => Some(Committed),
        (Committed, Unlock) => Some(Unlocked),
        (Aborted, Unlock) => Some(Unlocked),
        // A silent peer's phase timeout fires a pseudo-rejection from
        // whichever phase the SM is currently waiting in (spec.md §4.6
        // "Ack accounting").
        (Idle, Timeout) | (Locked, Timeout) | (Staged, Timeout) => Some(Aborted),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct OpTransition {
    pub old_phase: OpPhase,
    pub event: OpEvent,
    pub new_phase: OpPhase,
    pub at: DateTime<Utc>,
}

/// A bounded circular buffer of (old_state, event, new_state, time),
/// exposed through the `fsm-log` diagnostic RPC (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct OpTransitionLog {
    capacity: usize,
    entries: VecDeque<OpTransition>,
}

impl OpTransitionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, t: OpTransition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(t);
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpTransition> {
        self.entries.iter()
    }
}

impl Default for OpTransitionLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Advance the table by one `(phase, event)` step, logging the transition.
/// Returns the op name in the error purely for a readable message; the
/// table itself is op-agnostic.
pub fn advance(phase: OpPhase, event: OpEvent, log: &mut OpTransitionLog) -> Result<OpPhase, OpError> {
    let new_phase = table_lookup(phase, event).ok_or_else(|| {
        OpError::StageFailed(format!("invalid op-sm transition {:?} on event {:?}", phase, event))
    })?;
    log.push(OpTransition {
        old_phase: phase,
        event,
        new_phase,
        at: Utc::now(),
    });
    Ok(new_phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_unlocked() {
        let mut log = OpTransitionLog::new(8);
        let mut phase = OpPhase::Idle;
        phase = advance(phase, OpEvent::LockOk, &mut log).unwrap();
        phase = advance(phase, OpEvent::StageOk, &mut log).unwrap();
        phase = advance(phase, OpEvent::CommitDone, &mut log).unwrap();
        phase = advance(phase, OpEvent::Unlock, &mut log).unwrap();
        assert_eq!(phase, OpPhase::Unlocked);
        assert_eq!(log.iter().count(), 4);
    }

    #[test]
    fn stage_rejection_routes_through_aborted_to_unlock() {
        let mut log = OpTransitionLog::new(8);
        let mut phase = OpPhase::Idle;
        phase = advance(phase, OpEvent::LockOk, &mut log).unwrap();
        phase = advance(phase, OpEvent::StageReject, &mut log).unwrap();
        assert_eq!(phase, OpPhase::Aborted);
        phase = advance(phase, OpEvent::Unlock, &mut log).unwrap();
        assert_eq!(phase, OpPhase::Unlocked);
    }

    #[test]
    fn timeout_from_locked_aborts() {
        let mut log = OpTransitionLog::new(8);
        let mut phase = OpPhase::Idle;
        phase = advance(phase, OpEvent::LockOk, &mut log).unwrap();
        phase = advance(phase, OpEvent::Timeout, &mut log).unwrap();
        assert_eq!(phase, OpPhase::Aborted);
    }
}
