//! Volume Model (spec component C2): in-memory volume configuration,
//! brick arena, and the option map that feeds volfile generation.
//!
//! Generalizes the teacher's `types::volume::Volume` — there a sprawling
//! enum of ephemeral/persistent/shared PaaS volume kinds — into the single
//! `Volume` struct spec.md calls for: a distribute/stripe/replicate
//! composite of bricks with an options dictionary, checksum and version.

mod bricks;
mod model;
pub mod options;
mod registry;

pub use bricks::{validate_path_containment, Brick, BrickSpec, BrickStatus};
pub use model::{TransportType, Volume, VolumeStatus, VolumeType};
pub use options::{OptionEntry, OptionMap, OPTION_MAP};
pub use registry::VolumeRegistry;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("volume already exists: {0}")]
    AlreadyExists(String),

    #[error("volume name exceeds 1000 bytes")]
    NameTooLong,

    #[error("brick export path exceeds 1024 bytes")]
    PathTooLong,

    #[error("brick (host, path) already used by volume {0}")]
    BrickInUse(String),

    #[error("brick path {0} is a prefix of brick path {1}; recursive containment is rejected")]
    RecursiveContainment(String, String),

    #[error("brick path carries an extended attribute for a different volume: {0}")]
    OwnershipMismatch(uuid::Uuid),

    #[error("brick count {count} is not a multiple of {divisor} for this volume type")]
    InvalidBrickCount { count: usize, divisor: usize },

    #[error("cannot remove the last brick of a plain-stripe volume")]
    LastStripeBrick,

    #[error("unknown option key: {key}{suggestion}")]
    UnknownOption { key: String, suggestion: String },

    #[error("invalid value for option {key}: {reason}")]
    InvalidOptionValue { key: String, reason: String },

    #[error("cache-min-file-size must be <= cache-max-file-size")]
    CacheSizeRange,

    #[error("features.marker xtime cannot be disabled while a geo-replication session is active")]
    GeoReplicationActive,

    #[error("operation must run under the cluster lock")]
    LockNotHeld,
}
