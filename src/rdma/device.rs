//! The per-IB-device/port shared context (spec.md §3 "RDMA Device": "Devices
//! are process-wide and shared across transports to the same IB device/port"
//! — two shared-receive queues, one send CQ, two receive CQs, three
//! completion channels, a send-post pool, the QP-number registry, and three
//! poller threads). Receive posts are always freshly registered per
//! `post_recv` call rather than drawn from a pool — each arrives sized for
//! whatever the control/auxiliary channel needs next, so there is nothing to
//! reuse the way same-sized send buffers are; `recv_outstanding` still
//! tracks each by work-request id so its completion can recover the bytes.
//!
//! Modeled as a process-wide cache keyed by `(device_name, port)`, the same
//! shape as the teacher's `lazy_static SERVER_CONFIG`: the first transport to
//! ask for a device opens it and starts its pollers; every later transport on
//! the same device/port gets a cloned `Arc` instead of reopening verbs
//! resources the kernel only hands out once per process.

use std::collections::HashMap;
use std::ffi::CString;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use log::{error, info};
use parking_lot::Mutex;

use super::post::PostQueue;
use super::qpreg::QpReg;
use super::sys::*;
use super::RdmaError;

/// spec.md §4.7: "one send CQ (high watermark ~ send_count×1024)".
const SEND_CQ_WATERMARK_MULTIPLIER: i32 = 1024;

pub struct RdmaDevice {
    pub device_name: String,
    pub port: u8,

    context: *mut ibv_context,
    pd: *mut ibv_pd,
    srq: [*mut ibv_srq; 2],
    send_chan: *mut ibv_comp_channel,
    recv_chan: [*mut ibv_comp_channel; 2],
    send_cq: *mut ibv_cq,
    recv_cq: [*mut ibv_cq; 2],

    pub send_pool: PostQueue,
    pub qpreg: QpReg,

    /// Posted receive buffers keyed by work-request id, indexed by SRQ (0 =
    /// control, 1 = auxiliary), so the CQ poller can recover the actual
    /// bytes a completion refers to (libibverbs hands back only `wr_id` and
    /// `byte_len`, not the buffer itself).
    recv_outstanding: [Mutex<HashMap<u64, super::post::Post>>; 2],
    /// Posted send buffers keyed by work-request id, mirroring
    /// `recv_outstanding`: a send's `Post` must outlive `ibv_post_send`
    /// until the matching completion arrives on `send_cq`, since the NIC
    /// reads directly out of its registered memory in the meantime.
    send_outstanding: Mutex<HashMap<u64, super::post::Post>>,
    next_wr_id: AtomicU64,

    /// Flipped once by `Drop`; the three poller threads check it between
    /// `ibv_poll_cq` calls so teardown does not leak them (spec.md §9 notes
    /// the source has no analogous poller shutdown path).
    shutdown: AtomicBool,

    pollers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

// Every raw pointer field is an opaque verbs resource handle; concurrent use
// across the three poller threads plus callers of `writev`/`connect` is the
// documented concurrency model of libibverbs itself (CQs/QPs are meant to be
// shared across threads; serialization happens inside the library and via
// our own locks around the post pools / qp registry).
unsafe impl Send for RdmaDevice {}
unsafe impl Sync for RdmaDevice {}

impl RdmaDevice {
    pub fn context(&self) -> *mut ibv_context {
        self.context
    }

    pub fn pd(&self) -> *mut ibv_pd {
        self.pd
    }

    pub fn srq(&self, idx: usize) -> *mut ibv_srq {
        self.srq[idx]
    }

    pub fn send_cq(&self) -> *mut ibv_cq {
        self.send_cq
    }

    pub fn recv_cq(&self, idx: usize) -> *mut ibv_cq {
        self.recv_cq[idx]
    }

    pub fn send_chan(&self) -> *mut ibv_comp_channel {
        self.send_chan
    }

    pub fn recv_chan(&self, idx: usize) -> *mut ibv_comp_channel {
        self.recv_chan[idx]
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// `ib_verbs_get_local_lid`.
    pub fn local_lid(&self) -> u16 {
        unsafe {
            let mut attr = ibv_port_attr::default();
            if ibv_query_port(self.context, self.port, &mut attr) != 0 {
                return 0;
            }
            attr.lid
        }
    }

    /// `ib_verbs_new_post`: register a fresh, unpooled buffer of `len` bytes
    /// with the device's protection domain.
    pub fn new_post(&self, len: usize) -> Result<super::post::Post, RdmaError> {
        let mut post = super::post::Post::new(len);
        unsafe {
            let mr = ibv_reg_mr(
                self.pd,
                post.buf.as_mut_ptr() as *mut _,
                post.buf.len(),
                IBV_ACCESS_LOCAL_WRITE | IBV_ACCESS_REMOTE_WRITE | IBV_ACCESS_REMOTE_READ,
            );
            if mr.is_null() {
                return Err(RdmaError::VerbsCall("ibv_reg_mr"));
            }
            post.lkey = ibv_mr_lkey(mr);
            post.mr = Some(mr);
        }
        Ok(post)
    }

    /// Post a freshly allocated (or, for `aux`, caller-sized) receive buffer
    /// to shared-receive-queue `idx`, tracking it by a fresh `wr_id` so the
    /// matching completion can recover its bytes in `take_completed_recv`.
    pub fn post_recv(&self, idx: usize, len: usize, aux: bool) -> Result<(), RdmaError> {
        let mut post = self.new_post(len)?;
        post.aux = aux;
        let wr_id = self.next_wr_id.fetch_add(1, Ordering::Relaxed);
        unsafe {
            let mut sge = ibv_sge {
                addr: post.buf.as_mut_ptr() as u64,
                length: post.buf.len() as u32,
                lkey: post.lkey,
            };
            let mut wr = ibv_recv_wr {
                wr_id,
                next: ptr::null_mut(),
                sg_list: &mut sge,
                num_sge: 1,
            };
            let mut bad: *mut ibv_recv_wr = ptr::null_mut();
            if ibv_post_srq_recv(self.srq[idx], &mut wr, &mut bad) != 0 {
                return Err(RdmaError::VerbsCall("ibv_post_srq_recv"));
            }
        }
        self.recv_outstanding[idx].lock().insert(wr_id, post);
        Ok(())
    }

    /// Remove and return the buffer a just-completed receive work request
    /// refers to.
    pub fn take_completed_recv(&self, idx: usize, wr_id: u64) -> Option<super::post::Post> {
        self.recv_outstanding[idx].lock().remove(&wr_id)
    }

    /// `ibv_post_send`, tracking `post` in `send_outstanding` until the
    /// matching completion arrives — mirrors `post_recv`'s SRQ-side tracking
    /// so the send path never frees a buffer the NIC still owns.
    pub fn post_send(&self, qp: *mut ibv_qp, post: super::post::Post, len: usize) -> Result<(), RdmaError> {
        let wr_id = self.next_wr_id.fetch_add(1, Ordering::Relaxed);
        let rc = unsafe {
            let mut sge = ibv_sge {
                addr: post.buf.as_ptr() as u64,
                length: len as u32,
                lkey: post.lkey,
            };
            let mut wr = ibv_send_wr {
                wr_id,
                next: ptr::null_mut(),
                sg_list: &mut sge,
                num_sge: 1,
                opcode: IBV_WR_SEND,
                send_flags: IBV_SEND_SIGNALED,
                imm_data: 0,
            };
            let mut bad: *mut ibv_send_wr = ptr::null_mut();
            ibv_post_send(qp, &mut wr, &mut bad)
        };
        if rc != 0 {
            return Err(RdmaError::VerbsCall("ibv_post_send"));
        }
        self.send_outstanding.lock().insert(wr_id, post);
        Ok(())
    }

    /// Remove and return the buffer a just-completed send work request
    /// refers to.
    pub fn take_completed_send(&self, wr_id: u64) -> Option<super::post::Post> {
        self.send_outstanding.lock().remove(&wr_id)
    }
}

impl Drop for RdmaDevice {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.pollers.lock().drain(..) {
            let _ = handle.join();
        }
        unsafe {
            for cq in self.recv_cq {
                if !cq.is_null() {
                    ibv_destroy_cq(cq);
                }
            }
            if !self.send_cq.is_null() {
                ibv_destroy_cq(self.send_cq);
            }
            for srq in self.srq {
                if !srq.is_null() {
                    ibv_destroy_srq(srq);
                }
            }
            for chan in self.recv_chan {
                if !chan.is_null() {
                    ibv_destroy_comp_channel(chan);
                }
            }
            if !self.send_chan.is_null() {
                ibv_destroy_comp_channel(self.send_chan);
            }
            if !self.pd.is_null() {
                ibv_dealloc_pd(self.pd);
            }
            if !self.context.is_null() {
                ibv_close_device(self.context);
            }
        }
    }
}

type DeviceKey = (String, u8);

static DEVICE_CACHE: OnceLock<Mutex<HashMap<DeviceKey, Arc<RdmaDevice>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<DeviceKey, Arc<RdmaDevice>>> {
    DEVICE_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open (or, for a repeat caller, reuse) the shared `RdmaDevice` for
/// `device_name`/`port` (spec.md §3 "RDMA Device... process-wide and shared
/// across transports to the same IB device/port").
pub fn open_shared(device_name: &str, port: u8, send_count: u32, recv_count: u32) -> Result<Arc<RdmaDevice>, RdmaError> {
    let key = (device_name.to_string(), port);
    let mut guard = cache().lock();
    if let Some(existing) = guard.get(&key) {
        return Ok(existing.clone());
    }

    let device = Arc::new(open_device(device_name, port, send_count, recv_count)?);
    spawn_pollers(&device);
    guard.insert(key, device.clone());
    Ok(device)
}

fn open_device(device_name: &str, port: u8, send_count: u32, recv_count: u32) -> Result<RdmaDevice, RdmaError> {
    unsafe {
        let mut num_devices: i32 = 0;
        let list = ibv_get_device_list(&mut num_devices);
        if list.is_null() || num_devices == 0 {
            return Err(RdmaError::NoDevices);
        }

        let mut found: *mut ibv_device = ptr::null_mut();
        for i in 0..num_devices as isize {
            let dev = *list.offset(i);
            let name_ptr = ibv_get_device_name(dev);
            let name = std::ffi::CStr::from_ptr(name_ptr).to_string_lossy();
            if name == device_name {
                found = dev;
                break;
            }
        }
        if found.is_null() {
            ibv_free_device_list(list);
            return Err(RdmaError::DeviceNotFound(device_name.to_string()));
        }

        let context = ibv_open_device(found);
        ibv_free_device_list(list);
        if context.is_null() {
            return Err(RdmaError::VerbsCall("ibv_open_device"));
        }

        let pd = ibv_alloc_pd(context);
        if pd.is_null() {
            return Err(RdmaError::VerbsCall("ibv_alloc_pd"));
        }

        let send_chan = ibv_create_comp_channel(context);
        let recv_chan0 = ibv_create_comp_channel(context);
        let recv_chan1 = ibv_create_comp_channel(context);
        if send_chan.is_null() || recv_chan0.is_null() || recv_chan1.is_null() {
            return Err(RdmaError::VerbsCall("ibv_create_comp_channel"));
        }

        let send_cqe = (send_count as i32).saturating_mul(SEND_CQ_WATERMARK_MULTIPLIER).max(16);
        let send_cq = ibv_create_cq(context, send_cqe, ptr::null_mut(), send_chan, 0);
        let recv_cqe = (recv_count as i32).saturating_mul(2).max(16);
        let recv_cq0 = ibv_create_cq(context, recv_cqe, ptr::null_mut(), recv_chan0, 0);
        let recv_cq1 = ibv_create_cq(context, recv_cqe, ptr::null_mut(), recv_chan1, 0);
        if send_cq.is_null() || recv_cq0.is_null() || recv_cq1.is_null() {
            return Err(RdmaError::VerbsCall("ibv_create_cq"));
        }
        ibv_req_notify_cq(send_cq, 0);
        ibv_req_notify_cq(recv_cq0, 0);
        ibv_req_notify_cq(recv_cq1, 0);

        let mut srq_attr0 = ibv_srq_init_attr { max_wr: recv_count, max_sge: 1, ..Default::default() };
        let mut srq_attr1 = ibv_srq_init_attr { max_wr: recv_count, max_sge: 1, ..Default::default() };
        let srq0 = ibv_create_srq(pd, &mut srq_attr0);
        let srq1 = ibv_create_srq(pd, &mut srq_attr1);
        if srq0.is_null() || srq1.is_null() {
            return Err(RdmaError::VerbsCall("ibv_create_srq"));
        }

        let _ = CString::new(device_name).map_err(|_| RdmaError::DeviceNotFound(device_name.to_string()))?;

        Ok(RdmaDevice {
            device_name: device_name.to_string(),
            port,
            context,
            pd,
            srq: [srq0, srq1],
            send_chan,
            recv_chan: [recv_chan0, recv_chan1],
            send_cq,
            recv_cq: [recv_cq0, recv_cq1],
            send_pool: PostQueue::new(),
            qpreg: QpReg::new(),
            recv_outstanding: [Mutex::new(HashMap::new()), Mutex::new(HashMap::new())],
            send_outstanding: Mutex::new(HashMap::new()),
            next_wr_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            pollers: Mutex::new(Vec::new()),
        })
    }
}

/// Three dedicated OS threads per device — one send-completion poller, two
/// receive-completion pollers — because they block on verbs primitives and
/// must not run on the async executor (spec.md §5 "Thread model vs.
/// source"; SPEC_FULL.md §1.5).
fn spawn_pollers(device: &Arc<RdmaDevice>) {
    let send = device.clone();
    let send_handle = std::thread::Builder::new()
        .name("rdma-send-cq".into())
        .spawn(move || super::poller::send_completion_proc(&send))
        .expect("spawning rdma send-completion poller");

    let recv0 = device.clone();
    let recv0_handle = std::thread::Builder::new()
        .name("rdma-recv-cq-0".into())
        .spawn(move || super::poller::recv_completion_proc(&recv0, 0))
        .expect("spawning rdma recv-completion poller 0");

    let recv1 = device.clone();
    let recv1_handle = std::thread::Builder::new()
        .name("rdma-recv-cq-1".into())
        .spawn(move || super::poller::recv_completion_proc(&recv1, 1))
        .expect("spawning rdma recv-completion poller 1");

    info!("rdma: started 3 CQ poller threads for device {}", device.device_name);
    *device.pollers.lock() = vec![send_handle, recv0_handle, recv1_handle];
}

pub fn log_open_failure(device_name: &str, err: &RdmaError) {
    error!("rdma: failed to open device {}: {}", device_name, err);
}
