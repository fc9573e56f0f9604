//! `HttpPeerRpc`: the calling side of the four `/api/v1/rpc/*` endpoints in
//! [`super::rpc`] (spec.md §4.6's `PeerRpc` fanned out over the wire). Mirrors
//! the teacher's own `reqwest`-based calls out to sibling OmniOrchestrator
//! nodes, just pointed at this crate's own management API instead.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use crate::opsm::{Dict, OpKind, PeerRpc};
use crate::peer::{Peer, VolumeSnapshot};

pub struct HttpPeerRpc {
    client: Client,
    port: u16,
}

impl HttpPeerRpc {
    pub fn new(port: u16) -> Self {
        Self { client: Client::new(), port }
    }

    fn base_url(&self, peer: &Peer) -> String {
        format!("http://{}:{}/api/v1/rpc", peer.primary_hostname, self.port)
    }

    /// Liveness probe used by the peer-ping timer (SPEC_FULL.md §1.5), not
    /// part of the `PeerRpc` contract itself: a bare `GET /health` against
    /// the peer's management port.
    pub async fn ping(&self, peer: &Peer) -> bool {
        let url = format!("http://{}:{}/health", peer.primary_hostname, self.port);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn post(&self, url: String, body: serde_json::Value) -> Result<(), String> {
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("rpc call to {} failed: {}", url, e))?;

        let status = resp.status();
        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("rpc response from {} was not JSON: {}", url, e))?;

        if !status.is_success() {
            return Err(format!("rpc call to {} returned {}: {}", url, status, parsed));
        }
        if parsed.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let reason = parsed.get("error").and_then(|v| v.as_str()).unwrap_or("peer rejected");
            return Err(reason.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl PeerRpc for HttpPeerRpc {
    async fn lock(&self, peer: &Peer, req_id: Uuid) -> Result<(), String> {
        self.post(format!("{}/lock", self.base_url(peer)), json!({ "req_id": req_id })).await
    }

    async fn stage(&self, peer: &Peer, op: OpKind, dict: &Dict) -> Result<(), String> {
        self.post(format!("{}/stage", self.base_url(peer)), json!({ "op": op.name(), "dict": dict })).await
    }

    async fn commit(&self, peer: &Peer, op: OpKind, dict: &Dict) -> Result<(), String> {
        self.post(format!("{}/commit", self.base_url(peer)), json!({ "op": op.name(), "dict": dict })).await
    }

    async fn unlock(&self, peer: &Peer, req_id: Uuid) -> Result<(), String> {
        self.post(format!("{}/unlock", self.base_url(peer)), json!({ "req_id": req_id })).await
    }

    async fn fetch_snapshot(&self, peer: &Peer) -> Result<Vec<VolumeSnapshot>, String> {
        let url = format!("{}/snapshot", self.base_url(peer));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("rpc call to {} failed: {}", url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("rpc call to {} returned {}", url, status));
        }
        resp.json().await.map_err(|e| format!("rpc response from {} was not JSON: {}", url, e))
    }
}
