//! The peer registry: the set of known peers, keyed by UUID with a secondary
//! hostname index, both behind one registry lock (spec.md §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::gossip::{compare_friend_volume, GossipOutcome, VolumeSnapshot};
use super::state_machine::{
    advance, ConnectionStatus, FriendshipEvent, FriendshipState, TransitionLog,
    DEFAULT_LOG_CAPACITY,
};
use super::PeerError;

/// A single member of the trusted storage pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Null (`None`) until friendship completes, then immutable (spec.md §4.1).
    pub uuid: Option<Uuid>,
    pub primary_hostname: String,
    pub additional_hostnames: Vec<String>,
    pub connection: ConnectionStatus,
    pub friendship: FriendshipState,
    #[serde(skip)]
    pub log: TransitionLog,
}

impl Peer {
    pub fn new(primary_hostname: impl Into<String>) -> Self {
        Self {
            uuid: None,
            primary_hostname: primary_hostname.into(),
            additional_hostnames: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            friendship: FriendshipState::Default,
            log: TransitionLog::new(DEFAULT_LOG_CAPACITY),
        }
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_hostname.as_str())
            .chain(self.additional_hostnames.iter().map(String::as_str))
    }

    /// Advance the friendship SM by one event, logging the transition.
    fn advance(&mut self, event: FriendshipEvent) -> Result<(), PeerError> {
        self.friendship = advance(self.friendship, event, &mut self.log)?;
        match event {
            FriendshipEvent::Connect => self.connection = ConnectionStatus::Connected,
            FriendshipEvent::Disconnect => self.connection = ConnectionStatus::Disconnected,
            _ => {}
        }
        Ok(())
    }

    /// First successful hello exchange fills in the UUID; thereafter it is
    /// immutable (spec.md §4.1).
    pub fn assign_uuid(&mut self, uuid: Uuid) -> Result<(), PeerError> {
        match self.uuid {
            None => {
                self.uuid = Some(uuid);
                Ok(())
            }
            Some(existing) if existing == uuid => Ok(()),
            Some(_) => Err(PeerError::UuidImmutable),
        }
    }

    pub fn is_befriended(&self) -> bool {
        matches!(self.friendship, FriendshipState::Befriended)
    }
}

#[derive(Default)]
struct Tables {
    by_uuid: HashMap<Uuid, Peer>,
    /// peers not yet assigned a UUID, keyed by their primary hostname.
    pending_by_hostname: HashMap<String, Peer>,
    hostname_index: HashMap<String, Uuid>,
}

/// Owns the UUID -> Peer map and the hostname -> Peer secondary index,
/// both under one registry lock (spec.md §5 lock ordering: registry-lock
/// sits directly below the cluster lock).
pub struct PeerRegistry {
    tables: Arc<RwLock<Tables>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// `probe(host, port)` — begin a friendship handshake with a new host.
    /// Port is accepted for parity with the RPC-facing contract in spec.md
    /// §4.1 but the core registry only tracks the hostname; dialing the
    /// actual RPC channel is the network layer's job.
    pub async fn probe(&self, host: &str, _port: u16) -> Result<(), PeerError> {
        let mut tables = self.tables.write().await;
        if tables.hostname_index.contains_key(host)
            || tables.pending_by_hostname.contains_key(host)
        {
            return Err(PeerError::AlreadyKnown(host.to_string()));
        }
        let mut peer = Peer::new(host);
        peer.advance(FriendshipEvent::Probe)?;
        info!("probing peer {}", host);
        tables.pending_by_hostname.insert(host.to_string(), peer);
        Ok(())
    }

    /// Drive an event on a peer identified by UUID, once it has one.
    pub async fn apply_event(&self, uuid: &Uuid, event: FriendshipEvent) -> Result<(), PeerError> {
        let mut tables = self.tables.write().await;
        let peer = tables
            .by_uuid
            .get_mut(uuid)
            .ok_or_else(|| PeerError::NotFound(uuid.to_string()))?;
        peer.advance(event)?;
        debug!("peer {} -> {:?}", uuid, peer.friendship);
        Ok(())
    }

    /// Complete the handshake: move a pending-by-hostname peer into the
    /// UUID-keyed table once the first hello response names its UUID.
    pub async fn complete_handshake(&self, host: &str, uuid: Uuid) -> Result<(), PeerError> {
        let mut tables = self.tables.write().await;
        let mut peer = tables
            .pending_by_hostname
            .remove(host)
            .ok_or_else(|| PeerError::NotFound(host.to_string()))?;
        peer.assign_uuid(uuid)?;
        peer.advance(FriendshipEvent::InitFriendship)?;
        peer.advance(FriendshipEvent::Connect)?;
        tables.hostname_index.insert(host.to_string(), uuid);
        tables.by_uuid.insert(uuid, peer);
        info!("friendship completed with {} ({})", host, uuid);
        Ok(())
    }

    pub async fn lookup_by_uuid(&self, uuid: &Uuid) -> Option<Peer> {
        self.tables.read().await.by_uuid.get(uuid).cloned()
    }

    pub async fn lookup_by_hostname(&self, host: &str) -> Option<Peer> {
        let tables = self.tables.read().await;
        if let Some(uuid) = tables.hostname_index.get(host) {
            return tables.by_uuid.get(uuid).cloned();
        }
        tables.pending_by_hostname.get(host).cloned()
    }

    /// `detach(uuid|host)` — remove a peer entirely. Stale-volume cleanup for
    /// bricks that belonged solely to this peer is the caller's
    /// responsibility (driven from the volume model, spec.md §4.1 failure
    /// semantics: "runs only when an entire peer is detached").
    pub async fn detach(&self, uuid: &Uuid) -> Result<Peer, PeerError> {
        let mut tables = self.tables.write().await;
        let peer = tables
            .by_uuid
            .remove(uuid)
            .ok_or_else(|| PeerError::NotFound(uuid.to_string()))?;
        for host in peer.hostnames() {
            tables.hostname_index.remove(host);
        }
        warn!("detached peer {}", uuid);
        Ok(peer)
    }

    pub async fn iter_befriended(&self) -> Vec<Peer> {
        self.tables
            .read()
            .await
            .by_uuid
            .values()
            .filter(|p| p.is_befriended())
            .cloned()
            .collect()
    }

    pub async fn connected_count(&self) -> (usize, usize) {
        let tables = self.tables.read().await;
        let known = tables.by_uuid.len();
        let connected = tables
            .by_uuid
            .values()
            .filter(|p| p.connection == ConnectionStatus::Connected)
            .count();
        (connected, known)
    }

    /// Refuse new cluster-lock acquisition when quorum is lost (see
    /// SPEC_FULL.md §2, grounded in `glusterd-ha.c`).
    pub async fn assert_quorum(&self) -> Result<(), PeerError> {
        let (connected, known) = self.connected_count().await;
        if known == 0 {
            return Ok(());
        }
        if connected * 2 < known {
            return Err(PeerError::QuorumLost { connected, known });
        }
        Ok(())
    }

    /// Gossip exchange entrypoint: a peer sent us its volume snapshots.
    /// Returns the outcomes so the caller (op-sm / volume model) can act on
    /// UPDATE_REQ by importing the remote state.
    pub async fn update_from_gossip(
        &self,
        from: &Uuid,
        remote: &[VolumeSnapshot],
        local: &[VolumeSnapshot],
    ) -> Result<Vec<(String, GossipOutcome)>, PeerError> {
        if self.tables.read().await.by_uuid.get(from).is_none() {
            return Err(PeerError::NotFound(from.to_string()));
        }
        let mut outcomes = Vec::with_capacity(remote.len());
        for remote_vol in remote {
            let local_vol = local.iter().find(|v| v.name == remote_vol.name);
            let outcome = compare_friend_volume(local_vol, remote_vol);
            outcomes.push((remote_vol.name.clone(), outcome));
        }
        Ok(outcomes)
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
