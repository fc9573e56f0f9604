//! The `Volume` struct and its small enums (spec.md §3 Data model: Volume).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bricks::Brick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    None,
    Distribute,
    Stripe,
    Replicate,
    StripeReplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    Tcp,
    Rdma,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeStatus {
    Created,
    Started,
    Stopped,
}

/// In-memory volume configuration. Bricks are owned here by index (an
/// arena, not a pointer graph) so a `Brick` never needs a back-reference to
/// its volume; callers that need one pass the volume name alongside a brick
/// index rather than storing a cyclic pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub uuid: Uuid,
    pub kind: VolumeType,
    pub stripe_count: usize,
    pub replica_count: usize,
    pub dist_leaf_count: usize,
    pub bricks: Vec<Brick>,
    pub transport: TransportType,
    pub user: Option<String>,
    pub password: Option<String>,
    pub status: VolumeStatus,
    pub version: u64,
    pub checksum: u32,
    pub options: HashMap<String, String>,
    pub gsync_slaves: HashMap<String, String>,
}

impl Volume {
    pub fn new(name: impl Into<String>, kind: VolumeType, transport: TransportType) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            kind,
            stripe_count: 1,
            replica_count: 1,
            dist_leaf_count: 1,
            bricks: Vec::new(),
            transport,
            user: None,
            password: None,
            status: VolumeStatus::Created,
            version: 0,
            checksum: 0,
            options: HashMap::new(),
            gsync_slaves: HashMap::new(),
        }
    }

    pub fn brick_count(&self) -> usize {
        self.bricks.len()
    }

    /// The divisor brick-count arithmetic validates against (spec.md §4.2).
    pub fn sub_count(&self) -> usize {
        match self.kind {
            VolumeType::None | VolumeType::Distribute => 1,
            VolumeType::Stripe => self.stripe_count,
            VolumeType::Replicate => self.replica_count,
            VolumeType::StripeReplicate => self.stripe_count * self.replica_count,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self.status, VolumeStatus::Started)
    }
}
