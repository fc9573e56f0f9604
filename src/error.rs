//! Crate-wide error type.
//!
//! Each subsystem defines its own `thiserror` enum (see `peer::PeerError`,
//! `volume::VolumeError`, `store::StoreError`, `volfile::VolfileError`,
//! `brick::BrickError`, `opsm::OpError`, `rdma::RdmaError`). This type unifies
//! them at module boundaries that need to return a single error, such as the
//! Op-SM dispatch table and the management API.

use thiserror::Error;

use crate::brick::BrickError;
use crate::opsm::OpError;
use crate::peer::PeerError;
use crate::rdma::RdmaError;
use crate::store::StoreError;
use crate::volfile::VolfileError;
use crate::volume::VolumeError;

#[derive(Error, Debug)]
pub enum GlusterdError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Volfile(#[from] VolfileError),

    #[error(transparent)]
    Brick(#[from] BrickError),

    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Rdma(#[from] RdmaError),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, GlusterdError>;
