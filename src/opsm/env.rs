//! The process-wide handle the Op-SM's handlers operate on: every
//! subsystem C1-C5 plus the cluster lock, threaded explicitly rather than
//! reached through a global (spec.md §9 "Process-wide state... thread it
//! explicitly through an environment handle rather than a global").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::brick::BrickSupervisor;
use crate::lock::ClusterLock;
use crate::peer::PeerRegistry;
use crate::store::Store;
use crate::volume::VolumeRegistry;

use super::handlers::RebalanceStatus;
use super::PeerRpc;

pub struct Env {
    pub node_id: Uuid,
    pub peers: Arc<PeerRegistry>,
    pub volumes: Arc<VolumeRegistry>,
    pub store: Arc<Store>,
    pub bricks: Arc<BrickSupervisor>,
    pub cluster_lock: Arc<AsyncMutex<ClusterLock>>,
    pub peer_rpc: Arc<dyn PeerRpc>,
    /// Per-phase timeout; defaults to 120s (spec.md §4.6) but is shortened
    /// in tests so the ack-timeout path is actually exercised.
    pub phase_timeout: Duration,
    /// Per-volume rebalance status, keyed by volume name (SPEC_FULL.md §2,
    /// grounded in `glusterd-rebalance.c`'s per-node counters).
    pub rebalance: Mutex<HashMap<String, RebalanceStatus>>,
}

impl Env {
    pub fn new(
        node_id: Uuid,
        peers: Arc<PeerRegistry>,
        volumes: Arc<VolumeRegistry>,
        store: Arc<Store>,
        bricks: Arc<BrickSupervisor>,
        peer_rpc: Arc<dyn PeerRpc>,
    ) -> Self {
        Self {
            node_id,
            peers,
            volumes,
            store,
            bricks,
            cluster_lock: Arc::new(AsyncMutex::new(ClusterLock::new())),
            peer_rpc,
            phase_timeout: Duration::from_secs(120),
            rebalance: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }
}
