//! Brick type and the cluster-wide path-containment/ownership checks
//! (spec.md §3 Data model: Brick; SPEC_FULL.md §2 ownership-xattr check).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VolumeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrickStatus {
    Stopped,
    Started,
}

/// A brick as it lives inside a `Volume`'s arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brick {
    pub hostname: String,
    pub path: String,
    /// Resolved lazily from `hostname` by the caller; `None` until a peer
    /// lookup has filled it in.
    pub peer_uuid: Option<Uuid>,
    pub port: Option<u16>,
    pub log_file: Option<String>,
    pub decommissioned: bool,
    pub status: BrickStatus,
}

impl Brick {
    pub fn new(hostname: impl Into<String>, path: impl Into<String>) -> Result<Self, VolumeError> {
        let hostname = hostname.into();
        let path = path.into();
        if path.len() > 1024 {
            return Err(VolumeError::PathTooLong);
        }
        Ok(Self {
            hostname,
            path,
            peer_uuid: None,
            port: None,
            log_file: None,
            decommissioned: false,
            status: BrickStatus::Stopped,
        })
    }

    pub fn key(&self) -> (String, String) {
        (self.hostname.clone(), self.path.clone())
    }
}

/// The lightweight form of a brick exchanged over gossip (spec.md §4.1):
/// just enough to diff against the receiver's own brick set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickSpec {
    pub host: String,
    pub path: String,
}

impl From<&Brick> for BrickSpec {
    fn from(b: &Brick) -> Self {
        Self {
            host: b.hostname.clone(),
            path: b.path.clone(),
        }
    }
}

/// Reject a new (hostname, path) pair if it collides with, or recursively
/// contains/is contained by, any existing brick path on the same host
/// across the whole cluster (spec.md §3: "a path must not be a prefix of
/// another path in any volume").
pub fn validate_path_containment(
    candidate_host: &str,
    candidate_path: &str,
    existing: impl Iterator<Item = (String, String)>,
) -> Result<(), VolumeError> {
    let candidate = normalize(candidate_path);
    for (host, path) in existing {
        if host != candidate_host {
            continue;
        }
        let other = normalize(&path);
        if other == candidate {
            return Err(VolumeError::BrickInUse(format!("{}:{}", host, path)));
        }
        if is_prefix(&other, &candidate) {
            return Err(VolumeError::RecursiveContainment(other, candidate));
        }
        if is_prefix(&candidate, &other) {
            return Err(VolumeError::RecursiveContainment(candidate, other));
        }
    }
    Ok(())
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}

fn is_prefix(shorter: &str, longer: &str) -> bool {
    longer.len() > shorter.len()
        && longer.starts_with(shorter)
        && longer.as_bytes()[shorter.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_exact_duplicate() {
        let existing = vec![("h1".to_string(), "/data/b1".to_string())];
        let err = validate_path_containment("h1", "/data/b1", existing.into_iter());
        assert!(matches!(err, Err(VolumeError::BrickInUse(_))));
    }

    #[test]
    fn rejects_recursive_prefix() {
        let existing = vec![("h1".to_string(), "/data".to_string())];
        let err = validate_path_containment("h1", "/data/b1", existing.into_iter());
        assert!(matches!(err, Err(VolumeError::RecursiveContainment(_, _))));
    }

    #[test]
    fn allows_sibling_paths() {
        let existing = vec![("h1".to_string(), "/data/b1".to_string())];
        assert!(validate_path_containment("h1", "/data/b2", existing.into_iter()).is_ok());
    }

    #[test]
    fn ignores_paths_on_other_hosts() {
        let existing = vec![("h2".to_string(), "/data".to_string())];
        assert!(validate_path_containment("h1", "/data/b1", existing.into_iter()).is_ok());
    }
}
