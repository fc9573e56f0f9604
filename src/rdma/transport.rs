//! The `Transport` contract itself (spec.md §4.7 "Contract": `init`,
//! `connect`, `writev`, `receive`, `disconnect`, `bail`), grounded on
//! `ib_verbs_init`/`ib_verbs_connect`/`ib_verbs_writev`/`ib_verbs_receive`/
//! `ib_verbs_disconnect` in `examples/original_source/transport/ib-verbs/`.
//!
//! One `Transport` owns two queue pairs (control/auxiliary) on a shared
//! `RdmaDevice`, registers each in the device's QP-number registry so the CQ
//! pollers can route completions back to it, and exposes a synchronous
//! `receive` that copies out of whatever the poller last delivered — the
//! "data_ptr/data_offset" model spec.md describes, implemented here as a
//! small cursor over the last message `pop_inbound_blocking` handed back.

use std::net::TcpStream;
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use super::device::{open_shared, RdmaDevice};
use super::handshake::{self, HandshakeFrame};
use super::peer::{PeerRole, RdmaPeer};
use super::sys::*;
use super::RdmaError;

/// Per-transport tunables (spec.md §4.7; defaults mirror SPEC_FULL.md §1.3's
/// `GlusterdConfig` RDMA section).
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub device_name: String,
    pub port: u8,
    pub send_count: u32,
    pub recv_count: u32,
    pub send_size: u32,
    pub recv_size: u32,
    pub path_mtu: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            device_name: "mlx5_0".to_string(),
            port: 1,
            send_count: 32,
            recv_count: 32,
            send_size: 128 * 1024,
            recv_size: 1024 * 1024,
            path_mtu: 2048,
        }
    }
}

/// The in-flight (or just-delivered) message `receive` copies out of, one
/// synchronous call at a time (spec.md §4.7 "point the transport's
/// `data_ptr` at the post buffer... the callback will make synchronous
/// `receive` calls that copy out of `data_ptr[offset..offset+n]`").
struct Cursor {
    data: Vec<u8>,
    offset: usize,
}

pub struct Transport {
    options: TransportOptions,
    device: Arc<RdmaDevice>,
    control: Arc<RdmaPeer>,
    auxiliary: Arc<RdmaPeer>,
    qp0: *mut ibv_qp,
    qp1: *mut ibv_qp,
    bootstrap: Mutex<Option<TcpStream>>,
    cursor: Mutex<Option<Cursor>>,
    shutdown: AtomicBool,
}

// `qp0`/`qp1` are opaque verbs handles read only through the FFI calls that
// accept them; every other field is already thread-safe on its own terms
// (the `RdmaPeer`s' internal locking, `parking_lot::Mutex` elsewhere).
unsafe impl Send for Transport {}
unsafe impl Sync for Transport {}

impl Transport {
    /// `init(options)`: open (or join) the shared device and create this
    /// transport's two queue pairs against it. Does not touch the network —
    /// `connect` does the TCP bootstrap and QP state transitions.
    pub fn init(options: TransportOptions) -> Result<Self, RdmaError> {
        let device = open_shared(&options.device_name, options.port, options.send_count, options.recv_count)?;

        let qp0 = create_qp(&device, 0)?;
        let qp1 = create_qp(&device, 1)?;
        modify_to_init(qp0, options.port)?;
        modify_to_init(qp1, options.port)?;

        let mut control = RdmaPeer::new(PeerRole::Control, options.send_count, options.recv_count, options.send_size, options.recv_size);
        control.qp = Some(qp0);
        control.local_lid = device.local_lid();
        control.local_qpn = unsafe { (*qp0).qp_num };
        control.local_psn = 0;
        let control = Arc::new(control);

        let mut auxiliary = RdmaPeer::new(PeerRole::Auxiliary, options.send_count, options.recv_count, options.send_size, options.recv_size);
        auxiliary.qp = Some(qp1);
        auxiliary.local_lid = device.local_lid();
        auxiliary.local_qpn = unsafe { (*qp1).qp_num };
        auxiliary.local_psn = 0;
        let auxiliary = Arc::new(auxiliary);

        control.set_paired(&auxiliary);
        auxiliary.set_paired(&control);
        device.qpreg.register(control.local_qpn, control.clone());
        device.qpreg.register(auxiliary.local_qpn, auxiliary.clone());

        for _ in 0..options.recv_count {
            device.post_recv(0, options.send_size as usize + 2048, false)?;
        }
        device.post_recv(1, options.recv_size as usize, true)?;

        Ok(Self {
            options,
            device,
            control,
            auxiliary,
            qp0,
            qp1,
            bootstrap: Mutex::new(None),
            cursor: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// `connect(peer_addr)`: TCP bootstrap handshake, minimum-of-advertised
    /// block size negotiation, then INIT -> RTR -> RTS on both QPs (spec.md
    /// §4.7 "Initial handshake").
    pub fn connect(&self, peer_addr: &str) -> Result<(), RdmaError> {
        let mut sock = TcpStream::connect(peer_addr)?;
        let local = HandshakeFrame {
            qp0_recv_blksize: self.options.send_size + 2048,
            qp0_send_blksize: self.options.send_size + 2048,
            qp1_recv_blksize: self.options.recv_size,
            qp1_send_blksize: self.options.recv_size,
            qp0_lid: self.control.local_lid,
            qp0_qpn: self.control.local_qpn,
            qp0_psn: self.control.local_psn,
            qp1_lid: self.auxiliary.local_lid,
            qp1_qpn: self.auxiliary.local_qpn,
            qp1_psn: self.auxiliary.local_psn,
        };
        let remote = handshake::exchange(&mut sock, &local)?;

        modify_to_rtr(self.qp0, self.options.path_mtu, remote.qp0_qpn, remote.qp0_psn, remote.qp0_lid, self.options.port)?;
        modify_to_rtr(self.qp1, self.options.path_mtu, remote.qp1_qpn, remote.qp1_psn, remote.qp1_lid, self.options.port)?;
        modify_to_rts(self.qp0, self.control.local_psn)?;
        modify_to_rts(self.qp1, self.auxiliary.local_psn)?;

        self.control.init_quota();
        self.auxiliary.init_quota();
        *self.bootstrap.lock() = Some(sock);
        info!("rdma: transport connected to {}", peer_addr);
        Ok(())
    }

    /// `writev(vec)` (spec.md §4.7 "Send path"): small messages go out on
    /// QP0 from the pooled buffers; anything over `send_size + 2048` is
    /// rendezvoused through a `NeedDataMR` probe on QP0 plus the payload on
    /// QP1.
    pub fn writev(&self, data: &[u8]) -> Result<(), RdmaError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RdmaError::Disconnected);
        }
        let small_limit = self.options.send_size as usize + 2048;
        if data.len() <= small_limit {
            self.send_small(data, small_limit)
        } else {
            self.send_oversized(data)
        }
    }

    fn send_small(&self, data: &[u8], small_limit: usize) -> Result<(), RdmaError> {
        let (mut post, from_pool) = match self.device.send_pool.get() {
            Some(post) => (post, true),
            None => (self.device.new_post(small_limit)?, false),
        };
        post.buf[..data.len()].copy_from_slice(data);
        if !self.control.quota_get() {
            return Err(RdmaError::Disconnected);
        }
        if !from_pool {
            self.device.send_pool.note_active();
        }
        let len = data.len();
        self.device.post_send(self.qp0, post, len)
    }

    fn send_oversized(&self, data: &[u8]) -> Result<(), RdmaError> {
        let header = format!("{}{}\n", NEED_DATA_MR_PREFIX, data.len());
        let small_limit = self.options.send_size as usize + 2048;
        if header.len() > small_limit {
            return Err(RdmaError::MessageTooLarge(data.len()));
        }
        let mut control_post = self.device.new_post(small_limit)?;
        control_post.buf[..header.len()].copy_from_slice(header.as_bytes());
        control_post.aux = true;
        let header_len = header.len();

        let mut data_post = self.device.new_post(data.len())?;
        data_post.buf.copy_from_slice(data);
        data_post.aux = true;
        let data_len = data.len();

        if !self.control.quota_get() {
            return Err(RdmaError::Disconnected);
        }
        self.device.post_send(self.qp0, control_post, header_len)?;

        if !self.auxiliary.quota_get() {
            return Err(RdmaError::Disconnected);
        }
        self.device.post_send(self.qp1, data_post, data_len)
    }

    /// `receive(buf, len)`: copy out of whichever message the control peer's
    /// poller most recently delivered, blocking for the next one once the
    /// current cursor is exhausted.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize, RdmaError> {
        let mut cursor = self.cursor.lock();
        if cursor.as_ref().map(|c| c.offset >= c.data.len()).unwrap_or(true) {
            let data = self
                .control
                .pop_inbound_blocking()
                .ok_or(RdmaError::Disconnected)?;
            *cursor = Some(Cursor { data, offset: 0 });
        }
        let c = cursor.as_mut().expect("just populated above");
        let n = buf.len().min(c.data.len() - c.offset);
        buf[..n].copy_from_slice(&c.data[c.offset..c.offset + n]);
        c.offset += n;
        Ok(n)
    }

    /// `disconnect()`: orderly teardown — close the bootstrap socket, tear
    /// down both QPs, unregister from the device's QP map.
    pub fn disconnect(&self) {
        self.teardown();
        info!("rdma: transport disconnected");
    }

    /// `bail()` (spec.md §7 "Transport fatal errors"): the same teardown as
    /// `disconnect`, triggered by a completion error rather than a clean
    /// close. A real socket shutdown already unblocks any thread parked in a
    /// blocking read on it, which is what the source's explicit signal is
    /// for; we rely on `TcpStream::shutdown` to do that rather than raising
    /// one ourselves.
    pub fn bail(&self, reason: &str) {
        warn!("rdma: transport bailing: {}", reason);
        self.teardown();
    }

    fn teardown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sock) = self.bootstrap.lock().take() {
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
        self.control.shutdown();
        self.auxiliary.shutdown();
        self.device.qpreg.unregister(self.control.local_qpn);
        self.device.qpreg.unregister(self.auxiliary.local_qpn);
        unsafe {
            if !self.qp0.is_null() {
                ibv_destroy_qp(self.qp0);
            }
            if !self.qp1.is_null() {
                ibv_destroy_qp(self.qp1);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.teardown();
    }
}

const NEED_DATA_MR_PREFIX: &str = "NeedDataMR:";

fn create_qp(device: &RdmaDevice, idx: usize) -> Result<*mut ibv_qp, RdmaError> {
    unsafe {
        let mut init_attr = ibv_qp_init_attr {
            qp_context: ptr::null_mut::<c_void>(),
            send_cq: device.send_cq(),
            recv_cq: device.recv_cq(idx),
            srq: device.srq(idx),
            cap: ibv_qp_cap::default(),
            qp_type: IBV_QPT_RC,
            sq_sig_all: 0,
        };
        let qp = ibv_create_qp(device.pd(), &mut init_attr);
        if qp.is_null() {
            return Err(RdmaError::VerbsCall("ibv_create_qp"));
        }
        Ok(qp)
    }
}

fn modify_to_init(qp: *mut ibv_qp, port: u8) -> Result<(), RdmaError> {
    unsafe {
        let mut attr = ibv_qp_attr {
            qp_state: IBV_QPS_INIT,
            pkey_index: 0,
            port_num: port,
            qp_access_flags: IBV_ACCESS_LOCAL_WRITE | IBV_ACCESS_REMOTE_WRITE | IBV_ACCESS_REMOTE_READ,
            ..Default::default()
        };
        let mask = IBV_QP_STATE | IBV_QP_PKEY_INDEX | IBV_QP_PORT | IBV_QP_ACCESS_FLAGS;
        if ibv_modify_qp(qp, &mut attr, mask) != 0 {
            return Err(RdmaError::VerbsCall("ibv_modify_qp(INIT)"));
        }
    }
    Ok(())
}

/// spec.md §4.7: "path_mtu (from options), dest_qp_num, rq_psn,
/// ah_attr{dlid, port_num}".
fn modify_to_rtr(qp: *mut ibv_qp, path_mtu: u32, dest_qpn: u32, rq_psn: u32, dlid: u16, port: u8) -> Result<(), RdmaError> {
    unsafe {
        let mut attr = ibv_qp_attr {
            qp_state: IBV_QPS_RTR,
            path_mtu: mtu_to_enum(path_mtu),
            dest_qp_num: dest_qpn,
            rq_psn,
            max_dest_rd_atomic: 1,
            min_rnr_timer: 12,
            ah_attr: ibv_ah_attr {
                dlid,
                port_num: port,
                is_global: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mask = IBV_QP_STATE
            | IBV_QP_AV
            | IBV_QP_PATH_MTU
            | IBV_QP_DEST_QPN
            | IBV_QP_RQ_PSN
            | IBV_QP_MAX_DEST_RD_ATOMIC
            | IBV_QP_MIN_RNR_TIMER;
        if ibv_modify_qp(qp, &mut attr, mask) != 0 {
            return Err(RdmaError::VerbsCall("ibv_modify_qp(RTR)"));
        }
    }
    Ok(())
}

/// spec.md §4.7: "timeout=14, retry_cnt=7, rnr_retry=7, sq_psn,
/// max_rd_atomic=1".
fn modify_to_rts(qp: *mut ibv_qp, sq_psn: u32) -> Result<(), RdmaError> {
    unsafe {
        let mut attr = ibv_qp_attr {
            qp_state: IBV_QPS_RTS,
            timeout: 14,
            retry_cnt: 7,
            rnr_retry: 7,
            sq_psn,
            max_rd_atomic: 1,
            ..Default::default()
        };
        let mask = IBV_QP_STATE
            | IBV_QP_TIMEOUT
            | IBV_QP_RETRY_CNT
            | IBV_QP_RNR_RETRY
            | IBV_QP_SQ_PSN
            | IBV_QP_MAX_QP_RD_ATOMIC;
        if ibv_modify_qp(qp, &mut attr, mask) != 0 {
            return Err(RdmaError::VerbsCall("ibv_modify_qp(RTS)"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_message_boundary_matches_spec() {
        let opts = TransportOptions { send_size: 4096, ..Default::default() };
        assert_eq!(opts.send_size as usize + 2048, 6144);
    }

    #[test]
    fn need_data_mr_header_fits_small_limit() {
        let header = format!("{}{}\n", NEED_DATA_MR_PREFIX, 5_000_000usize);
        assert!(header.len() < 4096 + 2048);
    }
}
