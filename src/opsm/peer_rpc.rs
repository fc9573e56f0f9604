//! The peer-facing side of each Op-SM phase (spec.md §4.6: "send a `lock`
//! RPC to every befriended peer", "`stage-op`", "`commit-op`", "`unlock`").
//!
//! The wire encoding of these RPCs (XDR) is an external collaborator
//! (spec.md §1), so this crate only needs the shape of what it sends and
//! receives: one call per phase per peer. `NullPeerRpc` is the single-node
//! (no befriended peers yet, or a test harness) implementation; a real
//! network binding plugs in behind the same trait exactly the way
//! `async fn probe` in `peer::PeerRegistry` defers the actual RPC channel
//! to the network layer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::peer::{Peer, VolumeSnapshot};

use super::{Dict, OpKind};

#[async_trait]
pub trait PeerRpc: Send + Sync {
    async fn lock(&self, peer: &Peer, req_id: Uuid) -> Result<(), String>;
    async fn stage(&self, peer: &Peer, op: OpKind, dict: &Dict) -> Result<(), String>;
    async fn commit(&self, peer: &Peer, op: OpKind, dict: &Dict) -> Result<(), String>;
    async fn unlock(&self, peer: &Peer, req_id: Uuid) -> Result<(), String>;
    /// Fetch `peer`'s own volume snapshots for a gossip exchange (spec.md
    /// §4.1). Distinct from the lock/stage/commit/unlock phases: it is
    /// called outside the two-phase op lifecycle, on friendship completion
    /// and on every commit-end.
    async fn fetch_snapshot(&self, peer: &Peer) -> Result<Vec<VolumeSnapshot>, String>;
}

/// Every phase succeeds immediately without contacting anyone — correct
/// when there are no befriended peers (the registry simply will not be
/// asked to iterate any), and used by tests to drive the engine without a
/// network.
#[derive(Debug, Default)]
pub struct NullPeerRpc;

#[async_trait]
impl PeerRpc for NullPeerRpc {
    async fn lock(&self, _peer: &Peer, _req_id: Uuid) -> Result<(), String> {
        Ok(())
    }

    async fn stage(&self, _peer: &Peer, _op: OpKind, _dict: &Dict) -> Result<(), String> {
        Ok(())
    }

    async fn commit(&self, _peer: &Peer, _op: OpKind, _dict: &Dict) -> Result<(), String> {
        Ok(())
    }

    async fn unlock(&self, _peer: &Peer, _req_id: Uuid) -> Result<(), String> {
        Ok(())
    }

    async fn fetch_snapshot(&self, _peer: &Peer) -> Result<Vec<VolumeSnapshot>, String> {
        Ok(vec![])
    }
}
