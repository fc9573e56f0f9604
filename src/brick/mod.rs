//! Brick Supervisor (spec component C5): process lifecycle for brick
//! data-path daemons — spawn, pidfile+advisory lock, stop, socket-file
//! cleanup, port allocation (spec.md §4.5).
//!
//! Generalizes the teacher's `vmm::controller::spawn` (piped-stdio subprocess
//! spawn for a VM shim) into a supervisor that additionally tracks a
//! pidfile advisory lock, a deterministic Unix socket path, and a port-map
//! registry, since a brick process is long-lived and must survive the
//! glusterd process restarting around it.

mod portmap;
mod socket;
mod supervisor;
pub mod xattr;

pub use portmap::PortMap;
pub use socket::brick_socket_path;
pub use supervisor::{BrickHandle, BrickSupervisor, StopSignal};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrickError {
    #[error("brick process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free port in the private range starting at {0}")]
    PortRangeExhausted(u16),

    #[error("brick path already carries an xattr for a different volume: {0}")]
    OwnershipMismatch(uuid::Uuid),
}
