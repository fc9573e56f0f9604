//! The cluster lock (spec.md §3 "Cluster lock"; §5 lock ordering: cluster
//! lock sits above every other lock in the process).
//!
//! A single UUID field naming the holder plus a claim timestamp. Exactly one
//! Op-SM instance may hold it cluster-wide at any time (spec.md invariant 4).
//! Volume-model mutators (C2) do not acquire this lock themselves; they
//! accept a `&LockToken` that only `ClusterLock::acquire` can mint, so the
//! type system enforces "assert it is held" rather than leaving it to a
//! runtime check a reviewer has to trust.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("cluster lock already held by {0}")]
    AlreadyHeld(Uuid),

    #[error("cluster lock is not held")]
    NotHeld,

    #[error("lock release attempted by non-holder {attempted}, holder is {holder}")]
    NotHolder { holder: Uuid, attempted: Uuid },
}

/// Proof that the cluster lock is held by `holder`. Cannot be constructed
/// outside this module; `volume::VolumeRegistry` mutators require one.
#[derive(Debug, Clone, Copy)]
pub struct LockToken {
    holder: Uuid,
}

impl LockToken {
    pub fn holder(&self) -> Uuid {
        self.holder
    }
}

#[derive(Debug, Default)]
pub struct ClusterLock {
    holder: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
}

impl ClusterLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<Uuid> {
        self.holder
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    /// Acquire the lock for `holder`. Null holder means unlocked, so any
    /// non-null current holder rejects a new claim (spec.md §4.6 LOCK phase:
    /// "any rejection aborts").
    pub fn acquire(&mut self, holder: Uuid) -> Result<LockToken, LockError> {
        if let Some(existing) = self.holder {
            return Err(LockError::AlreadyHeld(existing));
        }
        self.holder = Some(holder);
        self.claimed_at = Some(Utc::now());
        Ok(LockToken { holder })
    }

    pub fn release(&mut self, token: LockToken) -> Result<(), LockError> {
        match self.holder {
            None => Err(LockError::NotHeld),
            Some(h) if h != token.holder => Err(LockError::NotHolder {
                holder: h,
                attempted: token.holder,
            }),
            Some(_) => {
                self.holder = None;
                self.claimed_at = None;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected() {
        let mut lock = ClusterLock::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _token = lock.acquire(a).unwrap();
        assert!(matches!(lock.acquire(b), Err(LockError::AlreadyHeld(h)) if h == a));
    }

    #[test]
    fn release_then_reacquire_by_other() {
        let mut lock = ClusterLock::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let token = lock.acquire(a).unwrap();
        lock.release(token).unwrap();
        assert!(lock.acquire(b).is_ok());
    }
}
