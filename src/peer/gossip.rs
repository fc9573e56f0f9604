//! Gossip of volume snapshots between befriended peers (spec.md §4.1).
//!
//! On friendship completion and on every commit-end, peers exchange, per
//! volume, `(name, type, version, brick-count, brick list, option entries,
//! checksum)`. `compare_friend_volume` is the receiver-side reconciliation
//! rule; importing an `UpdateRequired` snapshot (stopping stale bricks,
//! starting new ones, regenerating volfiles) is driven by the caller that
//! owns the volume model, not by the peer registry itself.

use serde::{Deserialize, Serialize};

use crate::volume::{BrickSpec, VolumeType};

/// What one side sends the other during gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub name: String,
    pub kind: VolumeType,
    pub version: u64,
    pub bricks: Vec<BrickSpec>,
    pub options: Vec<(String, String)>,
    pub checksum: u32,
}

/// Outcome of comparing a local volume snapshot against one received via
/// gossip (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipOutcome {
    /// Absent locally: import the remote snapshot wholesale.
    UpdateRequired,
    /// Local version is newer: tell the sender to catch up.
    SendCurrentSnapshot,
    /// Equal version, mismatched checksum: split-brain, abort the merge.
    Reject,
    /// Remote version is newer: import it.
    Stale,
}

/// `compare_friend_volume`: decide what to do with a volume snapshot a peer
/// just gossiped to us, given our own view of the same volume (`None` if we
/// don't have it at all).
pub fn compare_friend_volume(local: Option<&VolumeSnapshot>, remote: &VolumeSnapshot) -> GossipOutcome {
    let Some(local) = local else {
        return GossipOutcome::UpdateRequired;
    };
    if local.version > remote.version {
        GossipOutcome::SendCurrentSnapshot
    } else if local.version == remote.version {
        if local.checksum == remote.checksum {
            // Identical: nothing to do, but this isn't one of the named
            // outcomes in spec.md — callers treat it like SendCurrentSnapshot
            // (a no-op exchange) since no import or rejection is needed.
            GossipOutcome::SendCurrentSnapshot
        } else {
            GossipOutcome::Reject
        }
    } else {
        GossipOutcome::Stale
    }
}

/// The set of bricks present locally but absent from a remote snapshot —
/// these must be stopped when an `UpdateRequired`/`Stale` import lands
/// (spec.md §4.1: "stops stale local bricks... starts new ones").
pub fn stale_bricks<'a>(local: &'a VolumeSnapshot, remote: &VolumeSnapshot) -> Vec<&'a BrickSpec> {
    local
        .bricks
        .iter()
        .filter(|b| !remote.bricks.iter().any(|r| r.host == b.host && r.path == b.path))
        .collect()
}

pub fn new_bricks<'a>(local: &VolumeSnapshot, remote: &'a VolumeSnapshot) -> Vec<&'a BrickSpec> {
    remote
        .bricks
        .iter()
        .filter(|r| !local.bricks.iter().any(|b| b.host == r.host && b.path == r.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(version: u64, checksum: u32) -> VolumeSnapshot {
        VolumeSnapshot {
            name: "v1".into(),
            kind: VolumeType::Distribute,
            version,
            bricks: vec![],
            options: vec![],
            checksum,
        }
    }

    #[test]
    fn absent_locally_is_update_required() {
        assert_eq!(
            compare_friend_volume(None, &snap(1, 10)),
            GossipOutcome::UpdateRequired
        );
    }

    #[test]
    fn equal_version_mismatched_checksum_is_split_brain() {
        let local = snap(7, 111);
        let remote = snap(7, 222);
        assert_eq!(compare_friend_volume(Some(&local), &remote), GossipOutcome::Reject);
    }

    #[test]
    fn newer_remote_is_stale_locally() {
        let local = snap(3, 1);
        let remote = snap(5, 1);
        assert_eq!(compare_friend_volume(Some(&local), &remote), GossipOutcome::Stale);
    }

    #[test]
    fn newer_local_tells_peer_to_catch_up() {
        let local = snap(9, 1);
        let remote = snap(2, 1);
        assert_eq!(
            compare_friend_volume(Some(&local), &remote),
            GossipOutcome::SendCurrentSnapshot
        );
    }
}
