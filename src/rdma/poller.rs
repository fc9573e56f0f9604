//! Completion-queue poller thread bodies (spec.md §4.7 "Receive path" /
//! "Send completion"; grounded on `ib_verbs_recv_completion_proc` and the
//! send side of `ib_verbs_send_completion_proc` in the original transport).
//!
//! Each body blocks on `ibv_get_cq_event`, re-arms notification, then drains
//! every ready `ibv_wc` with `ibv_poll_cq` before blocking again — the same
//! "one event wakes up a batch" shape as the source, so a burst of
//! completions costs one syscall instead of one per completion.

use std::ptr;
use std::sync::Arc;

use log::{debug, warn};

use super::device::RdmaDevice;
use super::peer::RdmaPeer;
use super::sys::*;

const POLL_BATCH: usize = 16;

/// `ib_verbs_send_completion_proc`: every completed send returns its Post to
/// the send pool (or destroys it, if `aux`) and returns a credit to the peer
/// that owned it (spec.md "Flow-control invariants": "the send-completion
/// thread is the unique producer of credits").
pub fn send_completion_proc(device: &RdmaDevice) {
    while !device.is_shutting_down() {
        if wait_for_event(device.send_chan()).is_err() {
            continue;
        }
        unsafe {
            ibv_req_notify_cq(device.send_cq(), 0);
        }

        let mut wcs: [ibv_wc; POLL_BATCH] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe { ibv_poll_cq(device.send_cq(), POLL_BATCH as i32, wcs.as_mut_ptr()) };
            if n <= 0 {
                break;
            }
            for wc in &wcs[..n as usize] {
                handle_send_completion(device, wc);
            }
        }
    }
}

fn handle_send_completion(device: &RdmaDevice, wc: &ibv_wc) {
    if wc.status != IBV_WC_SUCCESS {
        warn!("rdma: send completion failed, status={}", wc.status);
    }
    if let Some(peer) = device.qpreg.lookup(wc.qp_num) {
        peer.quota_put();
    }
    match device.take_completed_send(wc.wr_id) {
        // Aux posts are one-shot allocations outside the pool (spec.md §4.7
        // "Send completion": "destroy it (aux=1)") — dropping it here
        // deregisters the memory region now that the NIC is done with it.
        Some(post) if post.aux => {}
        Some(post) => device.send_pool.put(post),
        None => warn!("rdma: send completion for untracked wr_id={}", wc.wr_id),
    }
    debug!("rdma: send completion wr_id={} qp_num={}", wc.wr_id, wc.qp_num);
}

/// `ib_verbs_recv_completion_proc`: drain completions on receive CQ `idx`
/// (0 = QP0/control, 1 = QP1/auxiliary). Re-posts a fresh receive buffer to
/// the matching shared-receive queue for every consumed completion so the
/// SRQ never starves (spec.md invariant: "every consumed receive post is
/// replaced before the next poll").
pub fn recv_completion_proc(device: &RdmaDevice, idx: usize) {
    while !device.is_shutting_down() {
        if wait_for_event(device.recv_chan(idx)).is_err() {
            continue;
        }
        unsafe {
            ibv_req_notify_cq(device.recv_cq(idx), 0);
        }

        let mut wcs: [ibv_wc; POLL_BATCH] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe { ibv_poll_cq(device.recv_cq(idx), POLL_BATCH as i32, wcs.as_mut_ptr()) };
            if n <= 0 {
                break;
            }
            for wc in &wcs[..n as usize] {
                handle_recv_completion(device, idx, wc);
            }
        }
    }
}

/// QP0 control line announcing an oversized payload is about to arrive on
/// QP1 (spec.md §6 "RDMA auxiliary control line").
const NEED_DATA_MR_PREFIX: &str = "NeedDataMR:";

fn handle_recv_completion(device: &RdmaDevice, idx: usize, wc: &ibv_wc) {
    if wc.status != IBV_WC_SUCCESS {
        warn!("rdma: recv completion failed, status={}", wc.status);
        return;
    }
    debug!(
        "rdma: recv completion wr_id={} qp_num={} byte_len={}",
        wc.wr_id, wc.qp_num, wc.byte_len
    );

    if let Some(peer) = device.qpreg.lookup(wc.qp_num) {
        deliver_payload(device, &peer, idx, wc);
    } else {
        warn!("rdma: recv completion for unregistered qp_num={}", wc.qp_num);
    }

    let repost_len = if idx == 0 { 4096 } else { 1024 * 1024 };
    if let Err(e) = device.post_recv(idx, repost_len, idx == 1) {
        warn!("rdma: failed to repost receive buffer to srq[{}]: {}", idx, e);
    }
}

/// Hand a completed receive off to its peer, rendezvousing with the
/// auxiliary channel first if this is a `NeedDataMR` probe (spec.md §4.7
/// "Receive path": "If the posted buffer begins with `NeedDataMR`, parse the
/// length, allocate an aux receive post of that length, post it on QP1, and
/// block on a per-post barrier until it completes").
fn deliver_payload(device: &RdmaDevice, peer: &Arc<RdmaPeer>, idx: usize, wc: &ibv_wc) {
    let post = match device.take_completed_recv(idx, wc.wr_id) {
        Some(post) => post,
        None => {
            warn!("rdma: recv completion for untracked wr_id={}", wc.wr_id);
            return;
        }
    };
    let len = wc.byte_len as usize;
    let bytes = post.buf.get(..len).unwrap_or(&post.buf[..]).to_vec();

    if idx == 0 {
        if let Some(rest) = bytes.strip_prefix(NEED_DATA_MR_PREFIX.as_bytes()) {
            let text = String::from_utf8_lossy(rest);
            let aux_len: usize = match text.trim_end_matches(['\n', '\0']).parse() {
                Ok(n) => n,
                Err(_) => {
                    warn!("rdma: malformed NeedDataMR header: {:?}", text);
                    return;
                }
            };
            if let Err(e) = device.post_recv(1, aux_len, true) {
                warn!("rdma: failed to post aux receive for NeedDataMR({}): {}", aux_len, e);
                return;
            }
            match peer.paired() {
                Some(aux_peer) => {
                    if let Some(data) = aux_peer.pop_inbound_blocking() {
                        peer.push_inbound(data);
                    }
                }
                None => warn!("rdma: NeedDataMR received on an unpaired control peer"),
            }
            return;
        }
    }

    peer.push_inbound(bytes);
}

/// Blocking wait for the next completion-channel event, acked immediately
/// (`ibv_ack_cq_events`) so the channel's internal event counter never grows
/// unbounded (spec.md §9 open question on ack batching: we ack one event at
/// a time, trading a little throughput for a bounded counter).
fn wait_for_event(channel: *mut ibv_comp_channel) -> Result<(), ()> {
    unsafe {
        let mut ev_cq: *mut ibv_cq = ptr::null_mut();
        let mut ev_ctx: *mut std::ffi::c_void = ptr::null_mut();
        if ibv_get_cq_event(channel, &mut ev_cq, &mut ev_ctx) != 0 {
            return Err(());
        }
        ibv_ack_cq_events(ev_cq, 1);
        Ok(())
    }
}
