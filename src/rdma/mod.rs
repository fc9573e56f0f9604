//! RDMA Verbs Transport (spec component C7): two queue pairs per transport
//! over a process-wide shared device, a TCP bootstrap handshake, and a
//! credit-flow-controlled send/receive path (spec.md §4.7).
//!
//! Has no teacher analogue — `network::client::NetworkClient` there is a
//! fully simulated stand-in with no real sockets — so this tree is grounded
//! directly on `examples/original_source/transport/ib-verbs/ib-verbs.c`:
//! `sys` mirrors its verbs struct layouts, `device` its process-wide
//! `ib_device` cache, `peer`/`post`/`qpreg` its per-QP credit/post/lookup
//! bookkeeping, `handshake` its `sprintf`/`sscanf` bootstrap frame, `poller`
//! its two completion-proc threads, and `transport` ties all of it into the
//! `init/connect/writev/receive/disconnect/bail` contract.

mod device;
mod handshake;
mod peer;
mod poller;
mod post;
mod qpreg;
mod sys;
mod transport;

pub use device::{open_shared, RdmaDevice};
pub use handshake::{HandshakeError, HandshakeFrame};
pub use peer::{PeerRole, RdmaPeer};
pub use post::{Post, PostQueue};
pub use qpreg::QpReg;
pub use transport::{Transport, TransportOptions};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RdmaError {
    #[error("no RDMA devices present on this host")]
    NoDevices,

    #[error("RDMA device not found: {0}")]
    DeviceNotFound(String),

    #[error("verbs call failed: {0}")]
    VerbsCall(&'static str),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is disconnected")]
    Disconnected,

    #[error("message of {0} bytes exceeds the configured oversized-post limit")]
    MessageTooLarge(usize),
}
