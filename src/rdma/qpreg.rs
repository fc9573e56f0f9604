//! QP-number -> peer registration (spec.md §3 "RDMA Device": "a per-QP-number
//! -> peer hash map (42 buckets)"; §5 "RDMA QP-number map: per-device mutex
//! over 42-bucket chained hash").
//!
//! The source chains entries through 42 intrusive `ents[42]` buckets under
//! one mutex; a plain `HashMap` behind a `parking_lot::Mutex` gives the same
//! "one lock, O(1) expected lookup" shape without the source's manual
//! chaining, while still reporting a bucket count for diagnostics so
//! `42` stays a visible, checkable constant rather than disappearing into
//! `HashMap`'s own internal table sizing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::peer::RdmaPeer;

pub const QPREG_BUCKETS: usize = 42;

#[derive(Default)]
pub struct QpReg {
    table: Mutex<HashMap<u32, Arc<RdmaPeer>>>,
}

impl QpReg {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ib_verbs_register_peer`.
    pub fn register(&self, qp_num: u32, peer: Arc<RdmaPeer>) {
        self.table.lock().insert(qp_num, peer);
    }

    /// `ib_verbs_unregister_peer`.
    pub fn unregister(&self, qp_num: u32) {
        self.table.lock().remove(&qp_num);
    }

    /// `ib_verbs_lookup_peer`.
    pub fn lookup(&self, qp_num: u32) -> Option<Arc<RdmaPeer>> {
        self.table.lock().get(&qp_num).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma::peer::PeerRole;

    #[test]
    fn register_then_lookup_finds_the_peer() {
        let reg = QpReg::new();
        let peer = Arc::new(RdmaPeer::new(PeerRole::Control, 16, 16, 4096, 4096));
        reg.register(7, peer);
        assert!(reg.lookup(7).is_some());
        assert!(reg.lookup(8).is_none());
    }

    #[test]
    fn unregister_removes_the_entry() {
        let reg = QpReg::new();
        let peer = Arc::new(RdmaPeer::new(PeerRole::Control, 16, 16, 4096, 4096));
        reg.register(7, peer);
        reg.unregister(7);
        assert!(reg.lookup(7).is_none());
        assert!(reg.is_empty());
    }
}
