//! Operation State Machine (spec component C6): cluster-wide two-phase
//! execution — lock -> stage (validate) -> commit -> unlock — with a
//! per-event transition log (spec.md §4.6).
//!
//! `begin(req, op, dict)` is the only public entry point (spec.md §4.6
//! "Contract"). Has no direct teacher analogue — `leader::LeaderElection` is
//! the closest shape (a small state machine driven on a background task) —
//! generalized here to the full lock/stage/commit/unlock lifecycle spec.md
//! requires, with per-peer fan-out modeled as one `tokio::spawn` task per
//! peer collected by the caller (SPEC_FULL.md §1.5), the way the teacher's
//! `initialization::start_peer_discovery` fans a loop out across known
//! peers.

mod ack;
mod dict;
mod engine;
mod env;
pub mod handlers;
mod peer_rpc;
mod state_machine;

pub use ack::AckCounter;
pub use dict::Dict;
pub use engine::{OpReply, OpStateMachine};
pub use env::Env;
pub use handlers::{NodeRebalanceCounters, OpKind, RebalanceState, RebalanceStatus};
pub use peer_rpc::{NullPeerRpc, PeerRpc};
pub use state_machine::{OpEvent, OpPhase, OpTransition, OpTransitionLog};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpError {
    #[error("cluster lock unavailable: {0}")]
    LockFailed(String),

    #[error("stage validation failed: {0}")]
    StageFailed(String),

    #[error("operation '{0}' timed out waiting for peer acks in the {1:?} phase")]
    Timeout(String, OpPhase),

    #[error("unknown operation: {0}")]
    UnknownOp(String),

    #[error("missing required dict key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Volume(#[from] crate::volume::VolumeError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Volfile(#[from] crate::volfile::VolfileError),

    #[error(transparent)]
    Brick(#[from] crate::brick::BrickError),

    #[error(transparent)]
    Lock(#[from] crate::lock::LockError),

    #[error(transparent)]
    Peer(#[from] crate::peer::PeerError),
}
