//! The Volume Model's registry (spec component C2): `new`, `find`, `delete`,
//! `iter`, `add_brick`, `remove_brick`, `replace_brick`, `set_option`,
//! `reset_option` (spec.md §4.2).
//!
//! Mirrors the shape of `peer::PeerRegistry` — a table behind one lock,
//! generalized here to the volume/brick arena model spec.md §4.2's
//! "Re-architecture guidance for cycles" calls for: bricks live in a
//! volume's own `Vec`, never holding a pointer back to their volume.
//! Mutators accept a `&lock::LockToken` so they can assert, rather than
//! merely document, that the cluster lock is held (spec.md §4.2: "they do
//! not themselves take the cluster lock but assert it is held").

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::lock::LockToken;

use super::bricks::{validate_path_containment, Brick, BrickStatus};
use super::model::{Volume, VolumeStatus, VolumeType};
use super::options::{self, OPTION_MAP};
use super::VolumeError;

pub struct VolumeRegistry {
    volumes: RwLock<HashMap<String, Volume>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, volume: Volume) -> Result<(), VolumeError> {
        if volume.name.len() > 1000 {
            return Err(VolumeError::NameTooLong);
        }
        let mut volumes = self.volumes.write().await;
        if volumes.contains_key(&volume.name) {
            return Err(VolumeError::AlreadyExists(volume.name));
        }
        let existing_bricks = all_bricks(&volumes);
        for b in &volume.bricks {
            validate_path_containment(&b.hostname, &b.path, existing_bricks.iter().cloned())?;
        }
        volumes.insert(volume.name.clone(), volume);
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Option<Volume> {
        self.volumes.read().await.get(name).cloned()
    }

    pub async fn iter(&self) -> Vec<Volume> {
        self.volumes.read().await.values().cloned().collect()
    }

    pub async fn find_by_uuid(&self, uuid: &Uuid) -> Option<Volume> {
        self.volumes
            .read()
            .await
            .values()
            .find(|v| &v.uuid == uuid)
            .cloned()
    }

    /// `delete(name)` — the caller is responsible for having stopped every
    /// brick and for invoking `store::delete_volume` so invariant 8 (no
    /// files remain under the volume's workdir) holds.
    pub async fn delete(&self, name: &str, _token: &LockToken) -> Result<Volume, VolumeError> {
        self.volumes
            .write()
            .await
            .remove(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    pub async fn set_status(&self, name: &str, status: VolumeStatus, _token: &LockToken) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        vol.status = status;
        Ok(())
    }

    pub async fn add_brick(
        &self,
        name: &str,
        new_bricks: Vec<Brick>,
        _token: &LockToken,
    ) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.write().await;
        let existing_bricks = all_bricks(&volumes);
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        for b in &new_bricks {
            if vol.bricks.iter().any(|existing| existing.key() == b.key()) {
                return Err(VolumeError::BrickInUse(format!("{}:{}", b.hostname, b.path)));
            }
            validate_path_containment(&b.hostname, &b.path, existing_bricks.iter().cloned())?;
        }

        let divisor = vol.sub_count();
        let is_degenerate_replicate = vol.kind == VolumeType::Replicate && vol.brick_count() < divisor;
        if divisor > 1 && !is_degenerate_replicate && new_bricks.len() % divisor != 0 {
            return Err(VolumeError::InvalidBrickCount {
                count: new_bricks.len(),
                divisor,
            });
        }

        vol.bricks.extend(new_bricks);
        vol.version += 1;
        Ok(())
    }

    pub async fn remove_brick(
        &self,
        name: &str,
        targets: &[(String, String)],
        _force: bool,
        _token: &LockToken,
    ) -> Result<Vec<Brick>, VolumeError> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if vol.kind == VolumeType::Stripe && vol.brick_count() == vol.sub_count() {
            return Err(VolumeError::LastStripeBrick);
        }

        let divisor = vol.sub_count();
        if vol.kind != VolumeType::None && vol.kind != VolumeType::Distribute && divisor > 1 && targets.len() % divisor != 0 {
            return Err(VolumeError::InvalidBrickCount {
                count: targets.len(),
                divisor,
            });
        }

        let mut removed = Vec::with_capacity(targets.len());
        for (host, path) in targets {
            let idx = vol
                .bricks
                .iter()
                .position(|b| &b.hostname == host && &b.path == path)
                .ok_or_else(|| VolumeError::NotFound(format!("{}:{}", host, path)))?;
            removed.push(vol.bricks.remove(idx));
        }
        vol.version += 1;
        Ok(removed)
    }

    /// `replace_brick(vol, src, dst)` — renames the src brick-slot to dst in
    /// place, preserving position so cluster-layer grouping (replicate /
    /// stripe windows) is unaffected (spec.md S3). The replace-brick
    /// start/pause/abort/commit protocol's pump-xlator and maintenance-mount
    /// steps are orchestrated by `opsm`; this just performs the final swap.
    pub async fn replace_brick(
        &self,
        name: &str,
        src: (&str, &str),
        dst: Brick,
        _token: &LockToken,
    ) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.write().await;
        let existing_bricks = all_bricks(&volumes);
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        validate_path_containment(
            &dst.hostname,
            &dst.path,
            existing_bricks
                .into_iter()
                .filter(|(h, p)| (h.as_str(), p.as_str()) != src),
        )?;
        let idx = vol
            .bricks
            .iter()
            .position(|b| b.hostname == src.0 && b.path == src.1)
            .ok_or_else(|| VolumeError::NotFound(format!("{}:{}", src.0, src.1)))?;
        vol.bricks[idx] = dst;
        vol.version += 1;
        Ok(())
    }

    /// Update the runtime-only fields of one brick in place (port, started/
    /// stopped status, log file path) once the brick supervisor has actually
    /// started or stopped the process (spec.md §4.5 start/stop protocol).
    /// `None` for a field leaves it unchanged; `Some(None)` clears it.
    pub async fn update_brick(
        &self,
        name: &str,
        host: &str,
        path: &str,
        port: Option<Option<u16>>,
        status: Option<BrickStatus>,
        log_file: Option<Option<String>>,
        _token: &LockToken,
    ) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        let brick = vol
            .bricks
            .iter_mut()
            .find(|b| b.hostname == host && b.path == path)
            .ok_or_else(|| VolumeError::NotFound(format!("{}:{}", host, path)))?;
        if let Some(p) = port {
            brick.port = p;
        }
        if let Some(s) = status {
            brick.status = s;
        }
        if let Some(l) = log_file {
            brick.log_file = l;
        }
        Ok(())
    }

    pub async fn set_option(
        &self,
        name: &str,
        key: &str,
        value: &str,
        _token: &LockToken,
    ) -> Result<(), VolumeError> {
        validate_option_value(key, value)?;
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        options::validate_cache_size_pair(key, value, &vol.options)?;

        if key == "features.marker.xtime" && !options::parse_bool(value).unwrap_or(true) {
            let gsync_active = !vol.gsync_slaves.is_empty();
            if gsync_active {
                return Err(VolumeError::GeoReplicationActive);
            }
        }

        vol.options.insert(key.to_string(), value.to_string());
        vol.version += 1;
        Ok(())
    }

    pub async fn reset_option(&self, name: &str, key: &str, _token: &LockToken) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(name).ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        vol.options.remove(key);
        vol.version += 1;
        Ok(())
    }
}

impl Default for VolumeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn all_bricks(volumes: &HashMap<String, Volume>) -> Vec<(String, String)> {
    volumes
        .values()
        .flat_map(|v| v.bricks.iter().map(|b| (b.hostname.clone(), b.path.clone())))
        .collect()
}

/// Unknown keys are rejected with a spell-corrected suggestion baked into
/// the error message (spec.md §4.4 Spell-correction); known keys get their
/// type-appropriate validation.
fn validate_option_value(key: &str, value: &str) -> Result<(), VolumeError> {
    let entry = OPTION_MAP.lookup(key).ok_or_else(|| {
        let suggestions = OPTION_MAP.suggest(key);
        let suggestion = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" (did you mean {}?)", suggestions.join(" or "))
        };
        VolumeError::UnknownOption {
            key: key.to_string(),
            suggestion,
        }
    })?;

    match key {
        "client.transport-mtu" => {
            options::validate_mtu(value)?;
        }
        k if entry.is_special() && entry.xlator_type == "performance/io-cache" && k.ends_with("-file-size") => {
            options::parse_numeric(key, value, Some((0, i64::MAX)))?;
        }
        "network.ping-timeout" | "network.frame-timeout" | "cluster.background-self-heal-count" => {
            options::parse_numeric(key, value, Some((0, 86400)))?;
        }
        _ if entry.is_special() || entry.default.map(|d| d == "on" || d == "off").unwrap_or(false) => {
            options::parse_bool(value)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ClusterLock;
    use crate::volume::model::TransportType;

    fn locked() -> (ClusterLock, LockToken) {
        let mut lock = ClusterLock::new();
        let token = lock.acquire(Uuid::new_v4()).unwrap();
        (lock, token)
    }

    #[tokio::test]
    async fn add_brick_enforces_replica_multiple() {
        let (_lock, token) = locked();
        let reg = VolumeRegistry::new();
        let mut vol = Volume::new("v1", VolumeType::Replicate, TransportType::Tcp);
        vol.replica_count = 2;
        vol.bricks = vec![
            Brick::new("a", "/b1").unwrap(),
            Brick::new("a", "/b2").unwrap(),
        ];
        reg.create(vol).await.unwrap();

        let bad = vec![Brick::new("a", "/b3").unwrap()];
        let err = reg.add_brick("v1", bad, &token).await;
        assert!(matches!(err, Err(VolumeError::InvalidBrickCount { .. })));

        let good = vec![Brick::new("a", "/b3").unwrap(), Brick::new("a", "/b4").unwrap()];
        reg.add_brick("v1", good, &token).await.unwrap();
        let vol = reg.find("v1").await.unwrap();
        assert_eq!(vol.brick_count(), 4);
        assert_eq!(vol.version, 1);
    }

    #[tokio::test]
    async fn remove_last_stripe_brick_rejected() {
        let (_lock, token) = locked();
        let reg = VolumeRegistry::new();
        let mut vol = Volume::new("v2", VolumeType::Stripe, TransportType::Tcp);
        vol.stripe_count = 1;
        vol.bricks = vec![Brick::new("a", "/b1").unwrap()];
        reg.create(vol).await.unwrap();

        let err = reg
            .remove_brick("v2", &[("a".to_string(), "/b1".to_string())], false, &token)
            .await;
        assert!(matches!(err, Err(VolumeError::LastStripeBrick)));
    }

    #[tokio::test]
    async fn unknown_option_rejected_with_suggestion() {
        let (_lock, token) = locked();
        let reg = VolumeRegistry::new();
        let vol = Volume::new("v3", VolumeType::Distribute, TransportType::Tcp);
        reg.create(vol).await.unwrap();
        let err = reg.set_option("v3", "performance.write-behinf", "on", &token).await;
        match err {
            Err(VolumeError::UnknownOption { suggestion, .. }) => {
                assert!(suggestion.contains("write-behind"));
            }
            _ => panic!("expected UnknownOption"),
        }
    }
}
