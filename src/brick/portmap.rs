//! Port-map registry: one TCP port per (host, export-path) brick, allocated
//! from the IANA private range via a monotonic cursor (spec.md §4.5 "Start
//! protocol" step 3).

use std::collections::HashMap;

use parking_lot::Mutex;

use super::BrickError;

const PRIVATE_RANGE_START: u16 = 49152;

struct Inner {
    by_path: HashMap<String, u16>,
    cursor: u16,
}

/// Process-wide, shared by every volume's bricks. Once a path has been
/// assigned a port, `port_alloc` keeps returning the same one across
/// restarts of the supervisor on the assumption the underlying process
/// still holds it (spec.md §4.5: "assume the process still holds the
/// port").
pub struct PortMap {
    inner: Mutex<Inner>,
}

impl PortMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_path: HashMap::new(),
                cursor: PRIVATE_RANGE_START,
            }),
        }
    }

    /// `port_lookup(path) -> port`
    pub fn lookup(&self, key: &str) -> Option<u16> {
        self.inner.lock().by_path.get(key).copied()
    }

    /// `port_alloc()` — returns the brick's existing port if known, else
    /// claims the next free one off the cursor.
    pub fn alloc(&self, key: &str) -> Result<u16, BrickError> {
        let mut inner = self.inner.lock();
        if let Some(&port) = inner.by_path.get(key) {
            return Ok(port);
        }
        let taken: std::collections::HashSet<u16> = inner.by_path.values().copied().collect();
        let mut candidate = inner.cursor;
        loop {
            if candidate == 0 {
                return Err(BrickError::PortRangeExhausted(PRIVATE_RANGE_START));
            }
            if !taken.contains(&candidate) {
                inner.cursor = candidate.wrapping_add(1);
                inner.by_path.insert(key.to_string(), candidate);
                return Ok(candidate);
            }
            let (next, overflowed) = candidate.overflowing_add(1);
            candidate = next;
            if overflowed {
                return Err(BrickError::PortRangeExhausted(PRIVATE_RANGE_START));
            }
        }
    }

    pub fn release(&self, key: &str) {
        self.inner.lock().by_path.remove(key);
    }
}

impl Default for PortMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_stable_for_the_same_path() {
        let pm = PortMap::new();
        let a = pm.alloc("h1:/d1").unwrap();
        let b = pm.alloc("h1:/d1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_advances_cursor_for_distinct_paths() {
        let pm = PortMap::new();
        let a = pm.alloc("h1:/d1").unwrap();
        let b = pm.alloc("h1:/d2").unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn release_frees_a_port_for_reuse() {
        let pm = PortMap::new();
        let key = "h1:/d1";
        let port = pm.alloc(key).unwrap();
        pm.release(key);
        assert_eq!(pm.lookup(key), None);
        let reused = pm.alloc("h1:/d2").unwrap();
        assert_ne!(reused, port);
    }
}
