//! The operation dispatch table: one `stage_*`/`commit_*` pair per op kind
//! (spec.md §4.6 "Dispatch table" — CLI command -> op kind -> stage fn,
//! commit fn). `stage` only validates and must not mutate durable state;
//! `commit` is where the mutation (and, for the local node, the store
//! write) actually happens (spec.md invariant: "STAGE must not mutate
//! durable state").

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::brick::xattr;
use crate::lock::LockToken;
use crate::peer::{GossipOutcome, Peer, VolumeSnapshot};
use crate::volume::{Brick, BrickSpec, BrickStatus, Volume, VolumeStatus, VolumeType};

use super::{Dict, Env, OpError, PeerRpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    CreateVolume,
    StartVolume,
    StopVolume,
    DeleteVolume,
    AddBrick,
    RemoveBrick,
    ReplaceBrick,
    SetOption,
    ResetOption,
    LogFilename,
    LogRotate,
    Sync,
    Rebalance,
}

impl OpKind {
    /// Parse the CLI-facing op name (spec.md §4.6; the grammar itself is
    /// out of scope, only the name -> kind mapping is needed here).
    pub fn parse(name: &str) -> Result<Self, OpError> {
        Ok(match name {
            "create-volume" => OpKind::CreateVolume,
            "start-volume" => OpKind::StartVolume,
            "stop-volume" => OpKind::StopVolume,
            "delete-volume" => OpKind::DeleteVolume,
            "add-brick" => OpKind::AddBrick,
            "remove-brick" => OpKind::RemoveBrick,
            "replace-brick" => OpKind::ReplaceBrick,
            "set-option" => OpKind::SetOption,
            "reset-option" => OpKind::ResetOption,
            "log-filename" => OpKind::LogFilename,
            "log-rotate" => OpKind::LogRotate,
            "sync" => OpKind::Sync,
            "rebalance" => OpKind::Rebalance,
            other => return Err(OpError::UnknownOp(other.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::CreateVolume => "create-volume",
            OpKind::StartVolume => "start-volume",
            OpKind::StopVolume => "stop-volume",
            OpKind::DeleteVolume => "delete-volume",
            OpKind::AddBrick => "add-brick",
            OpKind::RemoveBrick => "remove-brick",
            OpKind::ReplaceBrick => "replace-brick",
            OpKind::SetOption => "set-option",
            OpKind::ResetOption => "reset-option",
            OpKind::LogFilename => "log-filename",
            OpKind::LogRotate => "log-rotate",
            OpKind::Sync => "sync",
            OpKind::Rebalance => "rebalance",
        }
    }
}

/// Validate `dict` against `op` without touching the volume model, the
/// store, or any brick process (spec.md §4.6 STAGE phase).
pub async fn stage(env: &Env, op: OpKind, dict: &Dict) -> Result<(), OpError> {
    match op {
        OpKind::CreateVolume => stage_create_volume(env, dict).await,
        OpKind::StartVolume => stage_start_volume(env, dict).await,
        OpKind::StopVolume => stage_stop_volume(env, dict).await,
        OpKind::DeleteVolume => stage_delete_volume(env, dict).await,
        OpKind::AddBrick => stage_add_brick(env, dict).await,
        OpKind::RemoveBrick => stage_remove_brick(env, dict).await,
        OpKind::ReplaceBrick => stage_replace_brick(env, dict).await,
        OpKind::SetOption => stage_set_option(env, dict).await,
        OpKind::ResetOption => stage_reset_option(env, dict).await,
        OpKind::LogFilename => stage_log_filename(env, dict).await,
        OpKind::LogRotate => stage_log_rotate(env, dict).await,
        OpKind::Sync => stage_sync(env, dict).await,
        OpKind::Rebalance => stage_rebalance(env, dict).await,
    }
}

/// Apply `op`'s effect for real (spec.md §4.6 COMMIT phase), under the
/// supplied cluster-lock token.
pub async fn commit(env: &Env, op: OpKind, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    match op {
        OpKind::CreateVolume => commit_create_volume(env, dict).await,
        OpKind::StartVolume => commit_start_volume(env, dict, token).await,
        OpKind::StopVolume => commit_stop_volume(env, dict, token).await,
        OpKind::DeleteVolume => commit_delete_volume(env, dict, token).await,
        OpKind::AddBrick => commit_add_brick(env, dict, token).await,
        OpKind::RemoveBrick => commit_remove_brick(env, dict, token).await,
        OpKind::ReplaceBrick => commit_replace_brick(env, dict, token).await,
        OpKind::SetOption => commit_set_option(env, dict, token).await,
        OpKind::ResetOption => commit_reset_option(env, dict, token).await,
        OpKind::LogFilename => commit_log_filename(env, dict, token).await,
        OpKind::LogRotate => commit_log_rotate(env, dict).await,
        OpKind::Sync => commit_sync(env, dict, token).await,
        OpKind::Rebalance => commit_rebalance(env, dict).await,
    }
}

fn parse_volume_type(s: &str) -> Result<VolumeType, OpError> {
    Ok(match s {
        "distribute" | "none" => VolumeType::Distribute,
        "stripe" => VolumeType::Stripe,
        "replicate" => VolumeType::Replicate,
        "stripe-replicate" => VolumeType::StripeReplicate,
        other => return Err(OpError::StageFailed(format!("unknown volume type '{}'", other))),
    })
}

fn parse_transport(s: &str) -> Result<crate::volume::TransportType, OpError> {
    use crate::volume::TransportType::*;
    Ok(match s {
        "tcp" => Tcp,
        "rdma" => Rdma,
        "tcp,rdma" | "rdma,tcp" => Both,
        other => return Err(OpError::StageFailed(format!("unknown transport type '{}'", other))),
    })
}

async fn stage_create_volume(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    if env.volumes.find(name).await.is_some() {
        return Err(OpError::StageFailed(format!("volume {} already exists", name)));
    }
    let bricks = dict.bricks();
    if bricks.is_empty() {
        return Err(OpError::StageFailed("create-volume needs at least one brick".to_string()));
    }
    parse_volume_type(dict.get("type").unwrap_or("distribute"))?;
    parse_transport(dict.get("transport").unwrap_or("tcp"))?;
    for (host, path) in &bricks {
        Brick::new(host.as_str(), path.as_str())?;
    }
    Ok(())
}

async fn commit_create_volume(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?.to_string();
    let kind = parse_volume_type(dict.get("type").unwrap_or("distribute"))?;
    let transport = parse_transport(dict.get("transport").unwrap_or("tcp"))?;
    let mut vol = Volume::new(name, kind, transport);
    vol.stripe_count = dict.get_usize("stripe_count").unwrap_or(1);
    vol.replica_count = dict.get_usize("replica_count").unwrap_or(1);
    vol.dist_leaf_count = dict.get_usize("dist_count").unwrap_or(1);
    for (host, path) in dict.bricks() {
        vol.bricks.push(Brick::new(host, path)?);
    }
    for brick in &vol.bricks {
        xattr::check_or_set_owner(Path::new(&brick.path), vol.uuid)?;
    }
    env.volumes.create(vol.clone()).await?;
    env.store.persist_volume(&vol)?;
    info!("volume {} created with {} brick(s)", vol.name, vol.brick_count());
    Ok(())
}

async fn stage_start_volume(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    if vol.is_started() {
        return Err(OpError::StageFailed(format!("volume {} is already started", name)));
    }
    Ok(())
}

async fn commit_start_volume(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    for brick in &vol.bricks {
        let handle = env.bricks.start(&vol, brick)?;
        env.volumes
            .update_brick(name, &brick.hostname, &brick.path, Some(Some(handle.port)), Some(BrickStatus::Started), None, token)
            .await?;
    }
    env.volumes.set_status(name, VolumeStatus::Started, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {} started", name);
    Ok(())
}

async fn stage_stop_volume(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    if !vol.is_started() {
        return Err(OpError::StageFailed(format!("volume {} is not started", name)));
    }
    Ok(())
}

async fn commit_stop_volume(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    for brick in &vol.bricks {
        env.bricks.stop(&vol, brick, crate::brick::StopSignal::Term)?;
        env.volumes
            .update_brick(name, &brick.hostname, &brick.path, Some(None), Some(BrickStatus::Stopped), None, token)
            .await?;
    }
    env.volumes.set_status(name, VolumeStatus::Stopped, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {} stopped", name);
    Ok(())
}

async fn stage_delete_volume(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    if vol.is_started() {
        return Err(OpError::StageFailed(format!("volume {} must be stopped before deletion", name)));
    }
    Ok(())
}

async fn commit_delete_volume(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes.delete(name, token).await?;
    env.store.delete_volume(name)?;
    info!("volume {} deleted", name);
    Ok(())
}

async fn stage_add_brick(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    let bricks = dict.bricks();
    if bricks.is_empty() {
        return Err(OpError::StageFailed("add-brick needs at least one brick".to_string()));
    }
    for (host, path) in &bricks {
        Brick::new(host.as_str(), path.as_str())?;
    }
    Ok(())
}

async fn commit_add_brick(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let new_bricks: Result<Vec<Brick>, OpError> = dict
        .bricks()
        .into_iter()
        .map(|(h, p)| Brick::new(h, p).map_err(OpError::from))
        .collect();
    let new_bricks = new_bricks?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    for brick in &new_bricks {
        xattr::check_or_set_owner(Path::new(&brick.path), vol.uuid)?;
    }
    env.volumes.add_brick(name, new_bricks, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("brick(s) added to volume {}", name);
    Ok(())
}

async fn stage_remove_brick(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    if dict.bricks().is_empty() {
        return Err(OpError::StageFailed("remove-brick needs at least one brick".to_string()));
    }
    Ok(())
}

async fn commit_remove_brick(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let force = dict.get("force") == Some("1");
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    let removed = env.volumes.remove_brick(name, &dict.bricks(), force, token).await?;
    for brick in &removed {
        let _ = env.bricks.stop(&vol, brick, crate::brick::StopSignal::Term);
    }
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("{} brick(s) removed from volume {}", removed.len(), name);
    Ok(())
}

async fn stage_replace_brick(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    dict.require("src")?;
    let dst = dict.require("dst")?;
    dst.split_once(':')
        .ok_or_else(|| OpError::StageFailed("dst must be host:path".to_string()))?;
    Ok(())
}

async fn commit_replace_brick(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let src = dict.require("src")?;
    let (src_host, src_path) = src
        .split_once(':')
        .ok_or_else(|| OpError::StageFailed("src must be host:path".to_string()))?;
    let dst = dict.require("dst")?;
    let (dst_host, dst_path) = dst
        .split_once(':')
        .ok_or_else(|| OpError::StageFailed("dst must be host:path".to_string()))?;
    let dst_brick = Brick::new(dst_host, dst_path)?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    let src_brick = vol
        .bricks
        .iter()
        .find(|b| b.hostname == src_host && b.path == src_path)
        .cloned();
    if let Some(src_brick) = &src_brick {
        let _ = env.bricks.stop(&vol, src_brick, crate::brick::StopSignal::Term);
    }
    env.volumes.replace_brick(name, (src_host, src_path), dst_brick, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {}: replaced brick {} with {}", name, src, dst);
    Ok(())
}

async fn stage_set_option(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    dict.require("key")?;
    dict.require("value")?;
    Ok(())
}

async fn commit_set_option(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let key = dict.require("key")?;
    let value = dict.require("value")?;
    env.volumes.set_option(name, key, value, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {}: set {}={}", name, key, value);
    Ok(())
}

async fn stage_reset_option(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    dict.require("key")?;
    Ok(())
}

async fn commit_reset_option(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let key = dict.require("key")?;
    env.volumes.reset_option(name, key, token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {}: reset {}", name, key);
    Ok(())
}

async fn stage_log_filename(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    dict.require("brick")?;
    dict.require("path")?;
    Ok(())
}

async fn commit_log_filename(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let brick = dict.require("brick")?;
    let (host, path) = brick
        .split_once(':')
        .ok_or_else(|| OpError::StageFailed("brick must be host:path".to_string()))?;
    let log_path = dict.require("path")?.to_string();
    env.volumes.update_brick(name, host, path, None, None, Some(Some(log_path)), token).await?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    env.store.persist_volume(&vol)?;
    info!("volume {}: log filename for brick {} updated", name, brick);
    Ok(())
}

async fn stage_log_rotate(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    env.volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    Ok(())
}

/// log-rotate's effect is a best-effort SIGHUP to each running brick; it
/// does not touch durable state so there is nothing for peers to persist
/// and no cluster lock is required to apply it (SPEC_FULL.md §2).
async fn commit_log_rotate(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    for brick in &vol.bricks {
        env.bricks.rotate(&vol, brick)?;
    }
    info!("volume {}: log-rotate signaled to {} brick(s)", name, vol.brick_count());
    Ok(())
}

async fn stage_sync(env: &Env, dict: &Dict) -> Result<(), OpError> {
    dict.require("hostname")?;
    let _ = env;
    Ok(())
}

/// `sync` fetches the requesting peer's own gossiped snapshot over the
/// wire and reconciles every local volume against it (spec.md §4.1
/// "gossip exchange").
async fn commit_sync(env: &Env, dict: &Dict, token: &LockToken) -> Result<(), OpError> {
    let hostname = dict.require("hostname")?;
    let peer = env
        .peers
        .lookup_by_hostname(hostname)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("unknown peer {}", hostname)))?;
    let n = gossip_with_peer(env, &peer, env.peer_rpc.as_ref(), token).await?;
    info!("sync with {}: {} volume(s) compared", hostname, n);
    Ok(())
}

pub(crate) async fn snapshot_all(env: &Env) -> Vec<VolumeSnapshot> {
    env.volumes.iter().await.into_iter().map(|v| to_snapshot(&v)).collect()
}

fn to_snapshot(vol: &Volume) -> VolumeSnapshot {
    VolumeSnapshot {
        name: vol.name.clone(),
        kind: vol.kind,
        version: vol.version,
        bricks: vol.bricks.iter().map(BrickSpec::from).collect(),
        options: vol.options.iter().map(|(k, val)| (k.clone(), val.clone())).collect(),
        checksum: vol.checksum,
    }
}

/// Gossip exchange with one peer (spec.md §4.1: "On friendship completion
/// and on every commit-end, peers exchange a snapshot."): fetch its volume
/// snapshots over `rpc`, compare each against the local view, and import
/// whatever the comparison calls for. Returns the number of volumes
/// compared.
pub(crate) async fn gossip_with_peer(
    env: &Env,
    peer: &Peer,
    rpc: &dyn PeerRpc,
    token: &LockToken,
) -> Result<usize, OpError> {
    let uuid = match peer.uuid {
        Some(uuid) => uuid,
        None => return Ok(0),
    };
    let remote = rpc.fetch_snapshot(peer).await.map_err(OpError::StageFailed)?;
    let local = snapshot_all(env).await;
    let outcomes = env.peers.update_from_gossip(&uuid, &remote, &local).await?;
    for (name, outcome) in &outcomes {
        if let Some(snap) = remote.iter().find(|s| &s.name == name) {
            import_gossip_snapshot(env, *outcome, snap, token).await?;
        }
    }
    Ok(outcomes.len())
}

/// Import a gossiped snapshot that `compare_friend_volume` flagged as
/// needing one: stop stale local bricks, start/add new ones, and reissue
/// volfile generation for the result (spec.md §4.1).
async fn import_gossip_snapshot(
    env: &Env,
    outcome: GossipOutcome,
    remote: &VolumeSnapshot,
    token: &LockToken,
) -> Result<(), OpError> {
    if !matches!(outcome, GossipOutcome::UpdateRequired | GossipOutcome::Stale) {
        return Ok(());
    }
    match env.volumes.find(&remote.name).await {
        Some(local_vol) => {
            let local_snapshot = to_snapshot(&local_vol);
            let stale: Vec<(String, String)> = crate::peer::stale_bricks(&local_snapshot, remote)
                .into_iter()
                .map(|b| (b.host.clone(), b.path.clone()))
                .collect();
            for (host, path) in &stale {
                if let Some(brick) = local_vol.bricks.iter().find(|b| &b.hostname == host && &b.path == path) {
                    let _ = env.bricks.stop(&local_vol, brick, crate::brick::StopSignal::Term);
                }
            }
            if !stale.is_empty() {
                env.volumes.remove_brick(&remote.name, &stale, true, token).await?;
            }
            let to_add: Result<Vec<Brick>, OpError> = crate::peer::new_bricks(&local_snapshot, remote)
                .into_iter()
                .map(|b| Brick::new(b.host.as_str(), b.path.as_str()).map_err(OpError::from))
                .collect();
            let to_add = to_add?;
            if !to_add.is_empty() {
                env.volumes.add_brick(&remote.name, to_add, token).await?;
            }
            for (key, value) in &remote.options {
                env.volumes.set_option(&remote.name, key, value, token).await?;
            }
        }
        None => {
            let mut vol = Volume::new(remote.name.clone(), remote.kind, crate::volume::TransportType::Tcp);
            for b in &remote.bricks {
                vol.bricks.push(Brick::new(b.host.as_str(), b.path.as_str())?);
            }
            for (key, value) in &remote.options {
                vol.options.insert(key.clone(), value.clone());
            }
            env.volumes.create(vol).await?;
        }
    }
    let vol = env.volumes.find(&remote.name).await.ok_or_else(|| OpError::StageFailed(remote.name.clone()))?;
    env.store.persist_volume(&vol)?;
    if let Err(e) = env.store.persist_volfiles(&vol) {
        warn!("volume {}: volfile regeneration after gossip import failed: {}", vol.name, e);
    }
    info!("gossip import: volume {} synced from peer snapshot ({:?})", vol.name, outcome);
    Ok(())
}

async fn stage_rebalance(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env
        .volumes
        .find(name)
        .await
        .ok_or_else(|| OpError::StageFailed(format!("volume {} not found", name)))?;
    if !vol.is_started() {
        return Err(OpError::StageFailed(format!("volume {} must be started to rebalance", name)));
    }
    Ok(())
}

/// Rebalance has no synchronous data-migration engine in this crate
/// (spec.md's distribute-hash layout migration is out of scope); `commit`
/// only flips the per-volume tracker so `rebalance-status` has something
/// real to report (SPEC_FULL.md §2).
async fn commit_rebalance(env: &Env, dict: &Dict) -> Result<(), OpError> {
    let name = dict.require("volname")?;
    let vol = env.volumes.find(name).await.ok_or_else(|| OpError::StageFailed(name.to_string()))?;
    let mut statuses = env.rebalance.lock();
    let entry = statuses.entry(name.to_string()).or_insert_with(RebalanceStatus::default);
    entry.state = RebalanceState::InProgress;
    for brick in &vol.bricks {
        entry
            .per_node
            .entry(brick.hostname.clone())
            .or_insert_with(NodeRebalanceCounters::default);
    }
    entry.state = RebalanceState::Completed;
    info!("volume {}: rebalance marked completed ({} node(s))", name, entry.per_node.len());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalanceState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRebalanceCounters {
    pub files_scanned: u64,
    pub files_moved: u64,
    pub files_failed: u64,
}

/// Cluster-wide rebalance status for one volume (SPEC_FULL.md §2, grounded
/// in `glusterd-rebalance.c`'s per-node counters).
#[derive(Debug, Clone, Default)]
pub struct RebalanceStatus {
    pub state: RebalanceState,
    pub per_node: HashMap<String, NodeRebalanceCounters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_kind_round_trips_through_its_name() {
        for op in [
            OpKind::CreateVolume,
            OpKind::StartVolume,
            OpKind::StopVolume,
            OpKind::DeleteVolume,
            OpKind::AddBrick,
            OpKind::RemoveBrick,
            OpKind::ReplaceBrick,
            OpKind::SetOption,
            OpKind::ResetOption,
            OpKind::LogFilename,
            OpKind::LogRotate,
            OpKind::Sync,
            OpKind::Rebalance,
        ] {
            assert_eq!(OpKind::parse(op.name()).unwrap(), op);
        }
    }

    #[test]
    fn unknown_op_name_is_rejected() {
        assert!(OpKind::parse("frobnicate").is_err());
    }
}
