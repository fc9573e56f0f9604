//! The receiving side of the `PeerRpc` contract (spec.md §4.6): what a
//! befriended peer's management API does when another node's Op-SM fans a
//! phase out to it. Grounded directly in `opsm::peer_rpc::PeerRpc` — these
//! four handlers are the server-side mirror of `HttpPeerRpc`'s four client
//! calls, and must stay in lockstep with it.
//!
//! `STAGE` and `UNLOCK` are stateless (spec.md invariant: "STAGE must not
//! mutate durable state"), but `COMMIT` needs the `LockToken` the matching
//! `LOCK` minted. Since `Env::cluster_lock` only ever grants one holder at a
//! time, at most one operation can be mid-flight on this node regardless of
//! which remote req_id drove it, so `PendingLocks` only needs to remember
//! the single outstanding token, not a map keyed by req_id (the `PeerRpc`
//! trait's `commit`/`stage` calls do not carry a req_id to key by anyway).

use std::sync::Arc;

use parking_lot::Mutex;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use rocket::State;
use uuid::Uuid;

use crate::lock::LockToken;
use crate::opsm::{handlers, Dict, Env, OpKind};

#[derive(Default)]
pub struct PendingLocks(Mutex<Option<LockToken>>);

#[derive(Deserialize)]
pub struct LockRequest {
    req_id: Uuid,
}

#[derive(Deserialize)]
pub struct StageRequest {
    op: String,
    dict: Dict,
}

#[derive(Deserialize)]
pub struct CommitRequest {
    op: String,
    dict: Dict,
}

#[derive(Deserialize)]
pub struct UnlockRequest {
    req_id: Uuid,
}

#[derive(Serialize)]
pub struct RpcResult {
    ok: bool,
    error: Option<String>,
}

impl RpcResult {
    fn ok() -> Json<Self> {
        Json(Self { ok: true, error: None })
    }

    fn err(e: impl ToString) -> Json<Self> {
        Json(Self { ok: false, error: Some(e.to_string()) })
    }
}

#[rocket::post("/lock", data = "<req>")]
pub async fn rpc_lock(req: Json<LockRequest>, env: &State<Arc<Env>>, locks: &State<Arc<PendingLocks>>) -> Json<RpcResult> {
    let mut cluster_lock = env.cluster_lock.lock().await;
    match cluster_lock.acquire(req.req_id) {
        Ok(token) => {
            *locks.0.lock() = Some(token);
            RpcResult::ok()
        }
        Err(e) => RpcResult::err(e),
    }
}

#[rocket::post("/stage", data = "<req>")]
pub async fn rpc_stage(req: Json<StageRequest>, env: &State<Arc<Env>>) -> Json<RpcResult> {
    let op = match OpKind::parse(&req.op) {
        Ok(op) => op,
        Err(e) => return RpcResult::err(e),
    };
    match handlers::stage(env.inner(), op, &req.dict).await {
        Ok(()) => RpcResult::ok(),
        Err(e) => RpcResult::err(e),
    }
}

#[rocket::post("/commit", data = "<req>")]
pub async fn rpc_commit(req: Json<CommitRequest>, env: &State<Arc<Env>>, locks: &State<Arc<PendingLocks>>) -> Json<RpcResult> {
    let op = match OpKind::parse(&req.op) {
        Ok(op) => op,
        Err(e) => return RpcResult::err(e),
    };
    let token = match *locks.0.lock() {
        Some(token) => token,
        None => return RpcResult::err("commit received with no outstanding lock"),
    };
    match handlers::commit(env.inner(), op, &req.dict, &token).await {
        Ok(()) => RpcResult::ok(),
        Err(e) => RpcResult::err(e),
    }
}

#[rocket::post("/unlock", data = "<req>")]
pub async fn rpc_unlock(req: Json<UnlockRequest>, env: &State<Arc<Env>>, locks: &State<Arc<PendingLocks>>) -> Json<RpcResult> {
    let _ = &req.req_id;
    let token = match locks.0.lock().take() {
        Some(token) => token,
        None => return RpcResult::err("unlock received with no outstanding lock"),
    };
    let mut cluster_lock = env.cluster_lock.lock().await;
    match cluster_lock.release(token) {
        Ok(()) => RpcResult::ok(),
        Err(e) => RpcResult::err(e),
    }
}

/// The gossip-fetch side of `HttpPeerRpc::fetch_snapshot` (spec.md §4.1):
/// this node's own volume snapshots, for a peer to compare against its view.
#[rocket::get("/snapshot")]
pub async fn rpc_snapshot(env: &State<Arc<Env>>) -> Json<Vec<crate::peer::VolumeSnapshot>> {
    Json(handlers::snapshot_all(env.inner()).await)
}
