//! Peer Registry and Peer state machine (spec component C1).
//!
//! Owns the set of known peers, their friendship state machine, and the
//! gossip protocol that reconciles volume snapshots across the trusted
//! pool. Mirrors the shape of the teacher's `cluster::ClusterManager` —
//! a registry behind a single lock, reachable through a small async API —
//! generalized to carry the full peer/friendship/transition-log model
//! spec.md requires instead of a bare node map.

mod gossip;
mod registry;
mod state_machine;

pub use gossip::{compare_friend_volume, new_bricks, stale_bricks, GossipOutcome, VolumeSnapshot};
pub use registry::{Peer, PeerRegistry};
pub use state_machine::{ConnectionStatus, FriendshipEvent, FriendshipState, Transition};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("peer not found: {0}")]
    NotFound(String),

    #[error("peer already known: {0}")]
    AlreadyKnown(String),

    #[error("invalid friendship transition: {state:?} on event {event:?}")]
    InvalidTransition {
        state: FriendshipState,
        event: FriendshipEvent,
    },

    #[error("peer uuid is immutable once assigned")]
    UuidImmutable,

    #[error("cluster quorum lost: {connected} of {known} peers reachable")]
    QuorumLost { connected: usize, known: usize },
}
