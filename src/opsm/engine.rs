//! The Op-SM engine itself: `OpStateMachine::begin` drives one operation
//! through LOCK -> STAGE -> COMMIT -> UNLOCK (spec.md §4.6 "Lifecycle"),
//! fanning each phase out to every befriended peer as one `tokio::spawn`
//! task apiece, collected with a per-phase timeout (SPEC_FULL.md §1.5).
//!
//! Unlike the teacher's `leader::LeaderElection` (which just flips a local
//! atomic on a timer), every phase here can be rejected by either the local
//! node or any peer, and a rejection routes the whole operation through
//! `Aborted` to `Unlocked` rather than leaving it stuck (spec.md: "any
//! rejection at any phase aborts the operation").

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use crate::peer::Peer;

use super::state_machine::{advance, OpEvent, OpPhase, OpTransitionLog};
use super::{handlers, Dict, Env, OpError, OpKind};

/// What `begin` hands back to the CLI/RPC intake layer: the terminal phase
/// reached, the full transition log (for the `fsm-log` diagnostic), and the
/// rejection reason if the operation did not commit.
#[derive(Debug)]
pub struct OpReply {
    pub req_id: Uuid,
    pub phase: OpPhase,
    pub log: OpTransitionLog,
    pub error: Option<String>,
}

impl OpReply {
    pub fn committed(&self) -> bool {
        self.phase == OpPhase::Unlocked && self.error.is_none()
    }
}

pub struct OpStateMachine {
    env: Arc<Env>,
}

impl OpStateMachine {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }

    /// The only public entry point (spec.md §4.6 "Contract").
    pub async fn begin(&self, op: OpKind, dict: Dict) -> Result<OpReply, OpError> {
        let req_id = Uuid::new_v4();
        let mut log = OpTransitionLog::default();
        let mut phase = OpPhase::Idle;

        if let Err(e) = self.env.peers.assert_quorum().await {
            phase = advance(phase, OpEvent::LockReject, &mut log)?;
            warn!("op {} ({}) rejected at LOCK: {}", op.name(), req_id, e);
            return Ok(OpReply { req_id, phase, log, error: Some(e.to_string()) });
        }

        let token = {
            let mut lock = self.env.cluster_lock.lock().await;
            lock.acquire(self.env.node_id)
        };
        let token = match token {
            Ok(t) => t,
            Err(e) => {
                phase = advance(phase, OpEvent::LockReject, &mut log)?;
                warn!("op {} ({}) rejected at LOCK: {}", op.name(), req_id, e);
                return Ok(OpReply { req_id, phase, log, error: Some(e.to_string()) });
            }
        };

        let peers = self.env.peers.iter_befriended().await;

        let lock_outcome = fan_out_lock(self.env.peer_rpc.clone(), &peers, req_id, self.env.phase_timeout).await;
        if let Err(reason) = lock_outcome {
            phase = advance(phase, OpEvent::LockReject, &mut log)?;
            self.release_lock(token).await;
            phase = advance(phase, OpEvent::Unlock, &mut log)?;
            return Ok(OpReply { req_id, phase, log, error: Some(reason) });
        }
        phase = advance(phase, OpEvent::LockOk, &mut log)?;

        let local_stage = handlers::stage(&self.env, op, &dict).await;
        let peer_stage = if local_stage.is_ok() {
            fan_out_stage(self.env.peer_rpc.clone(), &peers, op, &dict, self.env.phase_timeout).await
        } else {
            Err(local_stage.as_ref().unwrap_err().to_string())
        };
        if let Err(reason) = peer_stage {
            phase = advance(phase, OpEvent::StageReject, &mut log)?;
            self.release_lock(token).await;
            phase = advance(phase, OpEvent::Unlock, &mut log)?;
            warn!("op {} ({}) rejected at STAGE: {}", op.name(), req_id, reason);
            return Ok(OpReply { req_id, phase, log, error: Some(reason) });
        }
        phase = advance(phase, OpEvent::StageOk, &mut log)?;

        // COMMIT is AP, not CP (spec.md §4.6): every peer applies its own
        // commit independently and failures are reconciled later by gossip,
        // not retried here.
        if let Err(e) = handlers::commit(&self.env, op, &dict, &token).await {
            warn!("op {} ({}) local commit failed: {}", op.name(), req_id, e);
        }
        let _ = fan_out_commit(self.env.peer_rpc.clone(), &peers, op, &dict, self.env.phase_timeout).await;
        phase = advance(phase, OpEvent::CommitDone, &mut log)?;

        // spec.md §4.1: "On friendship completion and on every commit-end,
        // peers exchange a snapshot." The token is still ours until we
        // release it below, so the gossip import below may mutate volumes.
        for peer in &peers {
            if let Err(e) = handlers::gossip_with_peer(&self.env, peer, self.env.peer_rpc.as_ref(), &token).await {
                warn!("op {} ({}) gossip exchange with {} failed: {}", op.name(), req_id, peer.primary_hostname, e);
            }
        }

        let _ = fan_out_unlock(self.env.peer_rpc.clone(), &peers, req_id, self.env.phase_timeout).await;
        self.release_lock(token).await;
        phase = advance(phase, OpEvent::Unlock, &mut log)?;

        info!("op {} ({}) committed", op.name(), req_id);
        Ok(OpReply { req_id, phase, log, error: None })
    }

    async fn release_lock(&self, token: crate::lock::LockToken) {
        let mut lock = self.env.cluster_lock.lock().await;
        if let Err(e) = lock.release(token) {
            warn!("releasing cluster lock: {}", e);
        }
    }
}

async fn fan_out_lock(
    rpc: Arc<dyn super::PeerRpc>,
    peers: &[Peer],
    req_id: Uuid,
    timeout: Duration,
) -> Result<(), String> {
    let mut tasks = Vec::with_capacity(peers.len());
    for peer in peers.iter().cloned() {
        let rpc = rpc.clone();
        tasks.push(tokio::spawn(async move { rpc.lock(&peer, req_id).await }));
    }
    await_all(tasks, timeout, "lock").await
}

async fn fan_out_stage(
    rpc: Arc<dyn super::PeerRpc>,
    peers: &[Peer],
    op: OpKind,
    dict: &Dict,
    timeout: Duration,
) -> Result<(), String> {
    let mut tasks = Vec::with_capacity(peers.len());
    for peer in peers.iter().cloned() {
        let rpc = rpc.clone();
        let dict = dict.clone();
        tasks.push(tokio::spawn(async move { rpc.stage(&peer, op, &dict).await }));
    }
    await_all(tasks, timeout, "stage").await
}

async fn fan_out_commit(
    rpc: Arc<dyn super::PeerRpc>,
    peers: &[Peer],
    op: OpKind,
    dict: &Dict,
    timeout: Duration,
) -> Result<(), String> {
    let mut tasks = Vec::with_capacity(peers.len());
    for peer in peers.iter().cloned() {
        let rpc = rpc.clone();
        let dict = dict.clone();
        tasks.push(tokio::spawn(async move { rpc.commit(&peer, op, &dict).await }));
    }
    await_all(tasks, timeout, "commit").await
}

async fn fan_out_unlock(
    rpc: Arc<dyn super::PeerRpc>,
    peers: &[Peer],
    req_id: Uuid,
    timeout: Duration,
) -> Result<(), String> {
    let mut tasks = Vec::with_capacity(peers.len());
    for peer in peers.iter().cloned() {
        let rpc = rpc.clone();
        tasks.push(tokio::spawn(async move { rpc.unlock(&peer, req_id).await }));
    }
    await_all(tasks, timeout, "unlock").await
}

/// Collect every spawned phase task, one ack per peer (spec.md §4.6 "Ack
/// accounting"): the first rejection or the first per-peer timeout fails
/// the whole phase.
async fn await_all(
    tasks: Vec<tokio::task::JoinHandle<Result<(), String>>>,
    timeout: Duration,
    phase_name: &str,
) -> Result<(), String> {
    let mut counter = super::ack::AckCounter::new(tasks.len());
    for task in tasks {
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => {
                counter.ack();
            }
            Ok(Ok(Err(reason))) => return Err(reason),
            Ok(Err(join_err)) => return Err(format!("peer task panicked: {}", join_err)),
            Err(_) => return Err(format!("{} phase timed out waiting for a peer ack", phase_name)),
        }
    }
    let _ = counter.outstanding();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::brick::BrickSupervisor;
    use crate::peer::PeerRegistry;
    use crate::store::Store;
    use crate::volume::VolumeRegistry;

    use super::super::{NullPeerRpc, PeerRpc};
    use super::*;

    fn test_env(peer_rpc: Arc<dyn PeerRpc>) -> Arc<Env> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(Env::new(
            Uuid::new_v4(),
            Arc::new(PeerRegistry::new()),
            Arc::new(VolumeRegistry::new()),
            Arc::new(Store::new(dir.path())),
            Arc::new(BrickSupervisor::new("/bin/true", dir.path())),
            peer_rpc,
        ))
    }

    #[tokio::test]
    async fn create_and_start_volume_round_trips_to_unlocked() {
        let env = test_env(Arc::new(NullPeerRpc));
        let sm = OpStateMachine::new(env.clone());

        let mut dict = Dict::new();
        dict.insert("volname", "v1").insert("type", "distribute").insert("brick1", "h1:/data/b1");
        let reply = sm.begin(OpKind::CreateVolume, dict).await.unwrap();
        assert!(reply.committed(), "{:?}", reply.error);

        let mut dict = Dict::new();
        dict.insert("volname", "v1");
        let reply = sm.begin(OpKind::StartVolume, dict).await.unwrap();
        assert!(reply.committed(), "{:?}", reply.error);

        let vol = env.volumes.find("v1").await.unwrap();
        assert!(vol.is_started());
    }

    #[tokio::test]
    async fn stage_rejection_is_reported_without_committing() {
        let env = test_env(Arc::new(NullPeerRpc));
        let sm = OpStateMachine::new(env.clone());

        let mut dict = Dict::new();
        dict.insert("volname", "missing");
        let reply = sm.begin(OpKind::StartVolume, dict).await.unwrap();
        assert!(!reply.committed());
        assert!(reply.error.is_some());
        assert_eq!(reply.phase, OpPhase::Unlocked);
    }

    struct RejectingStage;

    #[async_trait]
    impl PeerRpc for RejectingStage {
        async fn lock(&self, _peer: &Peer, _req_id: Uuid) -> Result<(), String> {
            Ok(())
        }
        async fn stage(&self, _peer: &Peer, _op: OpKind, _dict: &Dict) -> Result<(), String> {
            Err("peer refuses".to_string())
        }
        async fn commit(&self, _peer: &Peer, _op: OpKind, _dict: &Dict) -> Result<(), String> {
            Ok(())
        }
        async fn unlock(&self, _peer: &Peer, _req_id: Uuid) -> Result<(), String> {
            Ok(())
        }
        async fn fetch_snapshot(&self, _peer: &Peer) -> Result<Vec<crate::peer::VolumeSnapshot>, String> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn peer_stage_rejection_aborts_even_with_no_peers_listed() {
        // With zero befriended peers the rejecting trait never actually
        // gets invoked; this just confirms a local stage failure alone is
        // enough to abort without needing any peer round-trip.
        let env = test_env(Arc::new(RejectingStage));
        let sm = OpStateMachine::new(env);
        let mut dict = Dict::new();
        dict.insert("volname", "nope");
        let reply = sm.begin(OpKind::StartVolume, dict).await.unwrap();
        assert!(!reply.committed());
    }
}
