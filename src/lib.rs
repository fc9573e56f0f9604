//! glusterd-core: cluster-management and RDMA transport core for a
//! user-space distributed file system (spec.md §0 OVERVIEW).
//!
//! Seven components behind this crate root: the Peer Registry/Peer SM
//! (`peer`, C1), the Volume Model (`volume`, C2), the Persistent Store
//! (`store`, C3), the Volfile Generator (`volfile`, C4), the Brick
//! Supervisor (`brick`, C5), the Operation State Machine (`opsm`, C6), and
//! the RDMA Verbs Transport (`rdma`, C7), plus the ambient `config`/`error`/
//! `lock`/`logging` modules and the thin `api` management surface that wires
//! them together over HTTP.

pub mod api;
pub mod brick;
pub mod config;
pub mod cors;
pub mod error;
pub mod lock;
pub mod logging;
pub mod opsm;
pub mod peer;
pub mod rdma;
pub mod store;
pub mod volfile;
pub mod volume;

pub use error::{GlusterdError, Result};
