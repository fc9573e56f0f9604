//! `POST /api/v1/peer/probe`: the entry point for `gluster peer probe`
//! (spec.md §4.1 "Peer probe" — wraps `PeerRegistry::probe`). Also
//! `POST /api/v1/peer/handshake`, the hello-response side that completes a
//! friendship and gossips a snapshot immediately (spec.md §4.1: "On
//! friendship completion... peers exchange a snapshot.").

use std::sync::Arc;

use log::warn;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use rocket::State;
use uuid::Uuid;

use crate::opsm::{handlers, Env};

#[derive(Deserialize)]
pub struct ProbeRequest {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    24007
}

#[derive(Serialize)]
pub struct ProbeResponse {
    ok: bool,
    error: Option<String>,
}

#[rocket::post("/probe", data = "<req>")]
pub async fn probe_peer(req: Json<ProbeRequest>, env: &State<Arc<Env>>) -> Json<ProbeResponse> {
    match env.peers.probe(&req.host, req.port).await {
        Ok(()) => Json(ProbeResponse { ok: true, error: None }),
        Err(e) => Json(ProbeResponse { ok: false, error: Some(e.to_string()) }),
    }
}

#[derive(Deserialize)]
pub struct HandshakeRequest {
    host: String,
    uuid: Uuid,
}

#[rocket::post("/handshake", data = "<req>")]
pub async fn complete_handshake(req: Json<HandshakeRequest>, env: &State<Arc<Env>>) -> Json<ProbeResponse> {
    if let Err(e) = env.peers.complete_handshake(&req.host, req.uuid).await {
        return Json(ProbeResponse { ok: false, error: Some(e.to_string()) });
    }

    if let Some(peer) = env.peers.lookup_by_hostname(&req.host).await {
        let token = {
            let mut lock = env.cluster_lock.lock().await;
            lock.acquire(env.node_id)
        };
        if let Ok(token) = token {
            if let Err(e) = handlers::gossip_with_peer(env.inner(), &peer, env.peer_rpc.as_ref(), &token).await {
                warn!("gossip exchange with {} after handshake failed: {}", req.host, e);
            }
            let mut lock = env.cluster_lock.lock().await;
            let _ = lock.release(token);
        }
    }

    Json(ProbeResponse { ok: true, error: None })
}
