//! One RDMA communication peer — one of the two per transport, QP0
//! ("control") and QP1 ("auxiliary") — and its send-credit quota (spec.md §3
//! "RDMA Peer"; §5 "RDMA per-peer credit: mutex + condvar").
//!
//! `quota_get`/`quota_put` mirror `ib_verbs_quota_get`/`ib_verbs_quota_put`:
//! a sender blocks on a condvar when the credit counter hits zero, and the
//! unique producer of new credit is the send-completion poller (spec.md
//! "Flow-control invariants"). spec.md §9 flags that the source's condvar
//! cannot be woken on QP teardown; `shutdown` here is the flag we add so a
//! blocked `quota_get` unblocks when the transport tears down.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use super::sys::ibv_qp;

/// spec.md §4.7 "Receive path": the control (QP0) poller rendezvous-waits on
/// its auxiliary (QP1) counterpart to deliver a `NeedDataMR`-announced
/// payload. Set once at connect time, each side pointing at the other.
type Paired = Mutex<Option<Weak<RdmaPeer>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// QP0: normal-sized messages, `quota` initialized to `send_count`.
    Control,
    /// QP1: single oversized messages, `quota` initialized to 1.
    Auxiliary,
}

pub struct RdmaPeer {
    pub role: PeerRole,
    pub qp: Option<*mut ibv_qp>,

    pub send_count: u32,
    pub recv_count: u32,
    pub send_size: u32,
    pub recv_size: u32,

    pub local_lid: u16,
    pub local_qpn: u32,
    pub local_psn: u32,
    pub remote_lid: u16,
    pub remote_qpn: u32,
    pub remote_psn: u32,

    quota: Mutex<QuotaState>,
    has_quota: Condvar,

    /// Completed receives waiting for `Transport::receive` to copy them out
    /// (spec.md §4.7 "Receive path": "point the transport's `data_ptr` at
    /// the post buffer... the callback will make synchronous `receive` calls
    /// that copy out of `data_ptr[offset…offset+n]`"). One entry per
    /// delivered message; `Transport` tracks the offset within the front
    /// entry itself.
    inbound: Mutex<VecDeque<Vec<u8>>>,
    has_data: Condvar,

    paired: Paired,
}

struct QuotaState {
    quota: u32,
    shutdown: bool,
}

// The raw `ibv_qp` pointer is an opaque FFI handle, touched only through
// verbs calls that themselves serialize access via the completion queues;
// every other field is plain data. Safe to hand across the CQ poller
// threads and the caller thread that invokes `writev`.
unsafe impl Send for RdmaPeer {}
unsafe impl Sync for RdmaPeer {}

impl RdmaPeer {
    pub fn new(role: PeerRole, send_count: u32, recv_count: u32, send_size: u32, recv_size: u32) -> Self {
        Self {
            role,
            qp: None,
            send_count,
            recv_count,
            send_size,
            recv_size,
            local_lid: 0,
            local_qpn: 0,
            local_psn: 0,
            remote_lid: 0,
            remote_qpn: 0,
            remote_psn: 0,
            quota: Mutex::new(QuotaState { quota: 0, shutdown: false }),
            has_quota: Condvar::new(),
            inbound: Mutex::new(VecDeque::new()),
            has_data: Condvar::new(),
            paired: Mutex::new(None),
        }
    }

    /// Link this peer to its connection's other QP (control <-> auxiliary)
    /// so the control poller can rendezvous-wait on an aux delivery.
    pub fn set_paired(&self, other: &Arc<RdmaPeer>) {
        *self.paired.lock() = Some(Arc::downgrade(other));
    }

    pub fn paired(&self) -> Option<Arc<RdmaPeer>> {
        self.paired.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Called by the recv-completion poller once a message is fully
    /// assembled (the plain QP0 case, or the rendezvoused QP1 payload for an
    /// oversized message).
    pub fn push_inbound(&self, data: Vec<u8>) {
        self.inbound.lock().push_back(data);
        self.has_data.notify_one();
    }

    /// Block until a message is available, then pop it. Returns `None` once
    /// `shutdown` has been called and no message remains.
    pub fn pop_inbound_blocking(&self) -> Option<Vec<u8>> {
        let mut inbound = self.inbound.lock();
        loop {
            if let Some(front) = inbound.pop_front() {
                return Some(front);
            }
            if self.quota.lock().shutdown {
                return None;
            }
            self.has_data.wait(&mut inbound);
        }
    }

    /// Initializes the credit counter after a successful handshake (spec.md
    /// §4.7 "Initial handshake": "QP0 send credit... initialized to
    /// send_count and QP1 quota to 1").
    pub fn init_quota(&self) {
        let initial = match self.role {
            PeerRole::Control => self.send_count,
            PeerRole::Auxiliary => 1,
        };
        self.quota.lock().quota = initial;
    }

    /// Block until a send credit is available, then consume it (spec.md
    /// invariant 5: `0 <= quota <= send_count` at all times). Returns `false`
    /// if the transport is shutting down instead of granting a credit.
    pub fn quota_get(&self) -> bool {
        let mut state = self.quota.lock();
        while state.quota == 0 && !state.shutdown {
            self.has_quota.wait(&mut state);
        }
        if state.shutdown {
            return false;
        }
        state.quota -= 1;
        true
    }

    /// Return a credit (spec.md "Send completion": "the send-completion
    /// thread is the unique producer of credits").
    pub fn quota_put(&self) {
        let mut state = self.quota.lock();
        state.quota = (state.quota + 1).min(self.send_count.max(1));
        self.has_quota.notify_one();
    }

    pub fn quota(&self) -> u32 {
        self.quota.lock().quota
    }

    /// Unblocks any thread parked in `quota_get` so transport teardown does
    /// not hang (spec.md §9 open question on the source's un-wakeable
    /// condvar).
    pub fn shutdown(&self) {
        let mut state = self.quota.lock();
        state.shutdown = true;
        drop(state);
        self.has_quota.notify_all();
        self.has_data.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn quota_starts_at_send_count_for_control_peer() {
        let peer = RdmaPeer::new(PeerRole::Control, 16, 16, 4096, 4096);
        peer.init_quota();
        assert_eq!(peer.quota(), 16);
    }

    #[test]
    fn quota_starts_at_one_for_auxiliary_peer() {
        let peer = RdmaPeer::new(PeerRole::Auxiliary, 16, 16, 4096, 4096);
        peer.init_quota();
        assert_eq!(peer.quota(), 1);
    }

    #[test]
    fn get_then_put_restores_quota() {
        let peer = RdmaPeer::new(PeerRole::Control, 4, 4, 4096, 4096);
        peer.init_quota();
        assert!(peer.quota_get());
        assert_eq!(peer.quota(), 3);
        peer.quota_put();
        assert_eq!(peer.quota(), 4);
    }

    #[test]
    fn push_then_pop_inbound_returns_fifo_order() {
        let peer = RdmaPeer::new(PeerRole::Control, 4, 4, 4096, 4096);
        peer.push_inbound(vec![1, 2, 3]);
        peer.push_inbound(vec![4, 5]);
        assert_eq!(peer.pop_inbound_blocking(), Some(vec![1, 2, 3]));
        assert_eq!(peer.pop_inbound_blocking(), Some(vec![4, 5]));
    }

    #[test]
    fn shutdown_unblocks_a_waiting_receiver() {
        let peer = Arc::new(RdmaPeer::new(PeerRole::Control, 4, 4, 4096, 4096));
        let waiter = {
            let peer = peer.clone();
            std::thread::spawn(move || peer.pop_inbound_blocking())
        };
        std::thread::sleep(Duration::from_millis(50));
        peer.shutdown();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn paired_peer_is_reachable_until_dropped() {
        let control = Arc::new(RdmaPeer::new(PeerRole::Control, 4, 4, 4096, 4096));
        let aux = Arc::new(RdmaPeer::new(PeerRole::Auxiliary, 4, 4, 4096, 4096));
        control.set_paired(&aux);
        assert!(control.paired().is_some());
        drop(aux);
        assert!(control.paired().is_none());
    }

    #[test]
    fn shutdown_unblocks_a_waiting_getter() {
        let peer = Arc::new(RdmaPeer::new(PeerRole::Auxiliary, 1, 1, 4096, 4096));
        peer.init_quota();
        assert!(peer.quota_get()); // consume the only credit
        let waiter = {
            let peer = peer.clone();
            std::thread::spawn(move || peer.quota_get())
        };
        std::thread::sleep(Duration::from_millis(50));
        peer.shutdown();
        let granted = waiter.join().unwrap();
        assert!(!granted, "shutdown must return false rather than a credit");
    }
}
