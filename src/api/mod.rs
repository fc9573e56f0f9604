//! The management API: the thin HTTP surface a CLI front-end and befriended
//! peers talk to (spec.md §1 "the CLI/RPC wire grammar is an external
//! collaborator" — this module is deliberately just JSON-over-HTTP glue
//! around `OpStateMachine`, `PeerRegistry`, and `PeerRpc`, not a from-scratch
//! protocol).
//!
//! Grounded on the teacher's `server::build_rocket`/`cors::CORS` shape: one
//! `Rocket<Build>` assembled from `.manage()` calls plus a mounted route
//! table, with the same permissive CORS fairing, but `.manage()`s an `Env`
//! instead of a database pool and mounts the Op-SM/peer-RPC/probe routes
//! instead of the PaaS dashboard API.

pub mod health;
pub mod http_peer_rpc;
pub mod ops;
pub mod probe;
pub mod rpc;

use std::sync::Arc;

use colored::Colorize;
use rocket::{Build, Rocket};

use crate::config::GlusterdConfig;
use crate::cors::{cors_preflight, CORS};
use crate::opsm::{Env, OpStateMachine};

pub use http_peer_rpc::HttpPeerRpc;
pub use rpc::PendingLocks;

pub fn build_rocket(config: &GlusterdConfig, env: Arc<Env>) -> Rocket<Build> {
    log::info!("{}", "Defining management API routes".cyan());

    let sm = Arc::new(OpStateMachine::new(env.clone()));
    let pending_locks = Arc::new(PendingLocks::default());

    rocket::build()
        .configure(rocket::Config {
            port: config.port,
            address: config.address.parse().unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            ..Default::default()
        })
        .manage(env)
        .manage(sm)
        .manage(pending_locks)
        .attach(CORS)
        .mount("/", rocket::routes![health::health_check, cors_preflight])
        .mount("/api/v1/op", rocket::routes![ops::submit_op])
        .mount("/api/v1/peer", rocket::routes![probe::probe_peer, probe::complete_handshake])
        .mount(
            "/api/v1/rpc",
            rocket::routes![rpc::rpc_lock, rpc::rpc_stage, rpc::rpc_commit, rpc::rpc_unlock, rpc::rpc_snapshot],
        )
}
