//! Persistent Store (spec component C3): a write-ahead directory tree of
//! volume and peer records with checksums and atomic rename (spec.md §4.3).
//!
//! Generalizes the teacher's `db_manager` — there a SQL connection pool
//! fronting MySQL/ClickHouse — into the flat-file KV store spec.md
//! requires: `<workdir>/vols/<name>/{info,cksum,bricks/<host>:<path>}` and
//! `<workdir>/peers/<uuid>`, every write going through a `.tmp` + rename
//! discipline so a crash mid-write never corrupts the prior committed
//! state (spec.md invariant 3: "reflected on disk before any reply is
//! sent").

mod kv;
mod layout;

pub use kv::{parse_kv, render_kv};
pub use layout::Layout;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::peer::{ConnectionStatus, FriendshipState, Peer};
use crate::volume::{Brick, BrickStatus, TransportType, Volume, VolumeStatus, VolumeType};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("volume not found on disk: {0}")]
    VolumeNotFound(String),

    #[error("peer not found on disk: {0}")]
    PeerNotFound(String),

    #[error(transparent)]
    Volfile(#[from] crate::volfile::VolfileError),
}

fn io_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `contents` to `path` via a `.tmp` sibling + atomic rename (spec.md
/// §4.3 "Atomic write").
pub fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// `info=<u32>` computed over the info file's contents after sorting its
/// lines — the sort is part of the hash domain so key ordering on disk is
/// irrelevant (spec.md §4.3).
pub fn cksum_of(info_contents: &str) -> u32 {
    let mut lines: Vec<&str> = info_contents.lines().collect();
    lines.sort_unstable();
    let sorted = lines.join("\n");
    crc32fast::hash(sorted.as_bytes())
}

pub struct Store {
    layout: Layout,
}

impl Store {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::new(workdir),
        }
    }

    pub fn workdir(&self) -> &Path {
        self.layout.workdir()
    }

    pub fn persist_volume(&self, vol: &Volume) -> Result<(), StoreError> {
        let info = render_volume_info(vol);
        let info_path = self.layout.volume_info(&vol.name);
        atomic_write(&info_path, &info)?;

        let cksum = cksum_of(&info);
        let cksum_path = self.layout.volume_cksum(&vol.name);
        atomic_write(&cksum_path, &format!("info={}\n", cksum))?;

        for brick in &vol.bricks {
            let brick_path = self.layout.brick_info(&vol.name, &brick.hostname, &brick.path);
            atomic_write(&brick_path, &render_brick_info(brick))?;
        }
        Ok(())
    }

    /// Regenerate and persist every volfile a volume needs: one
    /// `protocol/server` graph per brick plus the client/fuse access graph
    /// (spec.md §4.4; reissued whenever a gossip import changes a volume's
    /// brick set, spec.md §4.1).
    pub fn persist_volfiles(&self, vol: &Volume) -> Result<(), StoreError> {
        let voldir = self.layout.volume_dir(&vol.name);
        for brick in &vol.bricks {
            let graph = crate::volfile::build_server(vol, &brick.path, &crate::volfile::ServerOverrides::default())?;
            let volfile_id = format!(
                "{}.{}.{}",
                vol.name,
                brick.hostname,
                brick.path.trim_start_matches('/').replace('/', "-")
            );
            let path = voldir.join(format!("{}.vol", volfile_id));
            atomic_write(&path, &graph.serialize())?;
        }
        let client_graph = crate::volfile::build_client_for_volume(vol, crate::volfile::DEFAULT_PERF)?;
        let client_path = voldir.join(format!("trusted-{}.tcp-fuse.vol", vol.name));
        atomic_write(&client_path, &client_graph.serialize())?;
        Ok(())
    }

    pub fn load_volume(&self, name: &str) -> Result<Volume, StoreError> {
        let info_path = self.layout.volume_info(name);
        let contents = fs::read_to_string(&info_path)
            .map_err(|_| StoreError::VolumeNotFound(name.to_string()))?;
        parse_volume_info(name, &contents)
    }

    /// Returns `(on_disk_cksum, recomputed_cksum)` for drift detection.
    pub fn verify_volume_cksum(&self, name: &str) -> Result<(u32, u32), StoreError> {
        let info_path = self.layout.volume_info(name);
        let info = fs::read_to_string(&info_path).map_err(|e| io_err(&info_path, e))?;
        let recomputed = cksum_of(&info);

        let cksum_path = self.layout.volume_cksum(name);
        let cksum_contents = fs::read_to_string(&cksum_path).map_err(|e| io_err(&cksum_path, e))?;
        let kv = parse_kv(&cksum_contents);
        let on_disk: u32 = kv
            .get("info")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::Malformed {
                path: cksum_path.clone(),
                reason: "missing or non-numeric info= line".to_string(),
            })?;
        Ok((on_disk, recomputed))
    }

    pub fn delete_volume(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.layout.volume_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(())
    }

    pub fn persist_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        let uuid = peer.uuid.ok_or_else(|| StoreError::Malformed {
            path: self.layout.peers_dir(),
            reason: "cannot persist a peer with no uuid yet".to_string(),
        })?;
        let path = self.layout.peer_info(&uuid);
        atomic_write(&path, &render_peer_info(peer))
    }

    pub fn delete_peer(&self, uuid: &Uuid) -> Result<(), StoreError> {
        let path = self.layout.peer_info(uuid);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
        }
        Ok(())
    }

    /// Read every persisted peer then volume on start-up, comparing each
    /// volume's recomputed cksum with its persisted record (spec.md §4.3
    /// "Recovery"). Single-node recovery has no newer-version peer to defer
    /// to, so a mismatch here just means the cksum file itself went stale
    /// (e.g. a crash between the info rename and the cksum rename); we
    /// re-derive it from the info file, which the atomic-write discipline
    /// guarantees is the most recently committed one.
    pub fn recover(&self) -> Result<(Vec<(String, u32, u32)>, Vec<Volume>), StoreError> {
        let mut drift = Vec::new();
        let mut volumes = Vec::new();

        let vols_dir = self.layout.vols_dir();
        if vols_dir.exists() {
            for entry in fs::read_dir(&vols_dir).map_err(|e| io_err(&vols_dir, e))? {
                let entry = entry.map_err(|e| io_err(&vols_dir, e))?;
                if !entry.file_type().map_err(|e| io_err(&vols_dir, e))?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let vol = self.load_volume(&name)?;
                if let Ok((on_disk, recomputed)) = self.verify_volume_cksum(&name) {
                    if on_disk != recomputed {
                        drift.push((name.clone(), on_disk, recomputed));
                        let info = render_volume_info(&vol);
                        atomic_write(
                            &self.layout.volume_cksum(&name),
                            &format!("info={}\n", cksum_of(&info)),
                        )?;
                    }
                }
                volumes.push(vol);
            }
        }
        Ok((drift, volumes))
    }
}

fn render_volume_info(vol: &Volume) -> String {
    let mut lines = vec![
        format!("type={}", volume_type_code(vol.kind)),
        format!("count={}", vol.brick_count()),
        format!("version={}", vol.version),
        format!("status={}", volume_status_code(vol.status)),
        format!("sub_count={}", vol.sub_count()),
        format!("stripe_count={}", vol.stripe_count),
        format!("replica_count={}", vol.replica_count),
        format!("dist_count={}", vol.dist_leaf_count),
        format!("volume_id={}", vol.uuid),
        format!("transport_type={}", transport_code(vol.transport)),
        format!("username={}", vol.user.clone().unwrap_or_default()),
        format!("password={}", vol.password.clone().unwrap_or_default()),
    ];
    let mut opts: Vec<_> = vol.options.iter().collect();
    opts.sort_by(|a, b| a.0.cmp(b.0));
    for (k, v) in opts {
        lines.push(format!("{}={}", k, v));
    }
    for (i, brick) in vol.bricks.iter().enumerate() {
        lines.push(format!("brick{}={}:{}", i + 1, brick.hostname, brick.path));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn parse_volume_info(name: &str, contents: &str) -> Result<Volume, StoreError> {
    let kv = parse_kv(contents);
    let get = |k: &str| kv.get(k).cloned();
    let get_num = |k: &str| -> Option<u64> { kv.get(k).and_then(|v| v.parse().ok()) };

    let kind = volume_type_from_code(get_num("type").unwrap_or(0) as u8);
    let transport = transport_from_code(get_num("transport_type").unwrap_or(0) as u8);
    let uuid: Uuid = get("volume_id")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut vol = Volume::new(name, kind, transport);
    vol.uuid = uuid;
    vol.version = get_num("version").unwrap_or(0);
    vol.status = volume_status_from_code(get_num("status").unwrap_or(0) as u8);
    vol.stripe_count = get_num("stripe_count").unwrap_or(1) as usize;
    vol.replica_count = get_num("replica_count").unwrap_or(1) as usize;
    vol.dist_leaf_count = get_num("dist_count").unwrap_or(1) as usize;
    vol.user = get("username").filter(|s| !s.is_empty());
    vol.password = get("password").filter(|s| !s.is_empty());

    let reserved = [
        "type", "count", "version", "status", "sub_count", "stripe_count", "replica_count",
        "dist_count", "volume_id", "transport_type", "username", "password",
    ];
    for (k, v) in &kv {
        if reserved.contains(&k.as_str()) || k.starts_with("brick") {
            continue;
        }
        vol.options.insert(k.clone(), v.clone());
    }

    let mut bricks: Vec<(usize, Brick)> = kv
        .iter()
        .filter_map(|(k, v)| {
            let idx: usize = k.strip_prefix("brick")?.parse().ok()?;
            let (host, path) = v.split_once(':')?;
            Some((idx, Brick::new(host, path).ok()?))
        })
        .collect();
    bricks.sort_by_key(|(i, _)| *i);
    vol.bricks = bricks.into_iter().map(|(_, b)| b).collect();

    Ok(vol)
}

fn render_brick_info(brick: &Brick) -> String {
    format!(
        "hostname={}\npath={}\ndecommissioned={}\n",
        brick.hostname,
        brick.path,
        if brick.decommissioned { 1 } else { 0 }
    )
}

fn render_peer_info(peer: &Peer) -> String {
    format!(
        "uuid={}\nhostname1={}\nstate={}\n",
        peer.uuid.expect("persist_peer checked uuid is Some"),
        peer.primary_hostname,
        friendship_code(peer.friendship),
    )
}

fn volume_type_code(kind: VolumeType) -> u8 {
    match kind {
        VolumeType::None => 0,
        VolumeType::Distribute => 1,
        VolumeType::Stripe => 2,
        VolumeType::Replicate => 3,
        VolumeType::StripeReplicate => 4,
    }
}

fn volume_type_from_code(code: u8) -> VolumeType {
    match code {
        1 => VolumeType::Distribute,
        2 => VolumeType::Stripe,
        3 => VolumeType::Replicate,
        4 => VolumeType::StripeReplicate,
        _ => VolumeType::None,
    }
}

fn volume_status_code(status: VolumeStatus) -> u8 {
    match status {
        VolumeStatus::Created => 0,
        VolumeStatus::Started => 1,
        VolumeStatus::Stopped => 2,
    }
}

fn volume_status_from_code(code: u8) -> VolumeStatus {
    match code {
        1 => VolumeStatus::Started,
        2 => VolumeStatus::Stopped,
        _ => VolumeStatus::Created,
    }
}

fn transport_code(t: TransportType) -> u8 {
    match t {
        TransportType::Tcp => 0,
        TransportType::Rdma => 1,
        TransportType::Both => 2,
    }
}

fn transport_from_code(code: u8) -> TransportType {
    match code {
        1 => TransportType::Rdma,
        2 => TransportType::Both,
        _ => TransportType::Tcp,
    }
}

fn friendship_code(state: FriendshipState) -> u8 {
    match state {
        FriendshipState::Default => 0,
        FriendshipState::ProbeSent => 1,
        FriendshipState::ProbeReceived => 2,
        FriendshipState::BefriendAccepted => 3,
        FriendshipState::Befriended => 4,
        FriendshipState::Rejected => 5,
        FriendshipState::UnfriendSent => 6,
    }
}

#[allow(dead_code)]
fn connection_code(c: ConnectionStatus) -> u8 {
    match c {
        ConnectionStatus::Disconnected => 0,
        ConnectionStatus::Connecting => 1,
        ConnectionStatus::Connected => 2,
    }
}

#[allow(unused)]
fn unused_brick_status(s: BrickStatus) -> u8 {
    match s {
        BrickStatus::Stopped => 0,
        BrickStatus::Started => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::model::TransportType as TT;
    use tempfile::tempdir;

    #[test]
    fn persist_then_load_round_trips_modulo_defaults() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut vol = Volume::new("v1", VolumeType::Replicate, TT::Tcp);
        vol.replica_count = 2;
        vol.bricks = vec![Brick::new("h1", "/data/b1").unwrap(), Brick::new("h1", "/data/b2").unwrap()];
        vol.options.insert("performance.write-behind".to_string(), "on".to_string());
        vol.version = 3;

        store.persist_volume(&vol).unwrap();
        let loaded = store.load_volume("v1").unwrap();

        assert_eq!(loaded.name, vol.name);
        assert_eq!(loaded.uuid, vol.uuid);
        assert_eq!(loaded.version, vol.version);
        assert_eq!(loaded.replica_count, vol.replica_count);
        assert_eq!(loaded.bricks.len(), 2);
        assert_eq!(loaded.options.get("performance.write-behind"), Some(&"on".to_string()));
    }

    #[test]
    fn cksum_is_insensitive_to_line_order() {
        let a = "b=2\na=1\n";
        let b = "a=1\nb=2\n";
        assert_eq!(cksum_of(a), cksum_of(b));
    }

    #[test]
    fn delete_volume_removes_directory() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let vol = Volume::new("gone", VolumeType::Distribute, TT::Tcp);
        store.persist_volume(&vol).unwrap();
        assert!(store.layout.volume_dir("gone").exists());
        store.delete_volume("gone").unwrap();
        assert!(!store.layout.volume_dir("gone").exists());
    }

    #[test]
    fn recover_rewrites_drifted_cksum() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let vol = Volume::new("v2", VolumeType::Distribute, TT::Tcp);
        store.persist_volume(&vol).unwrap();
        atomic_write(&store.layout.volume_cksum("v2"), "info=1\n").unwrap();

        let (drift, volumes) = store.recover().unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(volumes.len(), 1);
        let (on_disk, recomputed) = store.verify_volume_cksum("v2").unwrap();
        assert_eq!(on_disk, recomputed);
    }
}
