use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use log::{info, warn};
use uuid::Uuid;

use glusterd_core::api::{build_rocket, HttpPeerRpc};
use glusterd_core::brick::BrickSupervisor;
use glusterd_core::config::GlusterdConfig;
use glusterd_core::logging::print_banner;
use glusterd_core::opsm::Env;
use glusterd_core::peer::PeerRegistry;
use glusterd_core::store::Store;
use glusterd_core::volume::VolumeRegistry;

/// Loads the node's persistent UUID from `<workdir>/node-id`, minting and
/// writing one on first boot (spec.md §4.1: each peer carries a stable
/// UUID assigned once and never reassigned).
fn load_or_create_node_id(workdir: &Path) -> Uuid {
    let path = workdir.join("node-id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        if let Ok(uuid) = existing.trim().parse() {
            return uuid;
        }
        warn!("node-id file at {:?} is malformed, minting a new one", path);
    }

    let id = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&path, id.to_string()) {
        warn!("failed to persist node-id to {:?}: {}", path, e);
    }
    id
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    print_banner("GLUSTERD-CORE STARTUP", |s| s.bright_cyan());

    let config = GlusterdConfig::read().expect("failed to load glusterd config");
    let workdir = Path::new(&config.workdir);
    std::fs::create_dir_all(workdir)?;

    let node_id = load_or_create_node_id(workdir);
    info!("node id: {}", node_id);

    let peers = Arc::new(PeerRegistry::new());
    let volumes = Arc::new(VolumeRegistry::new());
    let store = Arc::new(Store::new(workdir));
    let bricks = Arc::new(BrickSupervisor::new("/usr/sbin/glusterfsd", workdir));

    info!("{}", "recovering persistent store".cyan());
    let (drift, recovered_volumes) = store.recover().expect("store recovery failed");
    for (name, on_disk, recomputed) in &drift {
        warn!("volume {} checksum drift: on-disk={:#x} recomputed={:#x}, rewritten", name, on_disk, recomputed);
    }
    for vol in recovered_volumes {
        let name = vol.name.clone();
        if let Err(e) = volumes.create(vol).await {
            warn!("failed to load recovered volume {} into registry: {}", name, e);
        }
    }

    let peer_rpc = Arc::new(HttpPeerRpc::new(config.port));
    let env = Arc::new(
        Env::new(node_id, peers, volumes, store, bricks, peer_rpc)
            .with_phase_timeout(std::time::Duration::from_secs(config.op_phase_timeout_secs)),
    );

    spawn_peer_ping_task(env.clone(), config.port, config.peer_ping_interval_secs);

    let rocket = build_rocket(&config, env);
    let _ = rocket.launch().await?;

    Ok(())
}

/// The "timer thread for pings" SPEC_FULL.md §1.5 calls for: every
/// `interval_secs`, probe each befriended peer's `/health` and fold the
/// result into a `Connect`/`Disconnect` friendship-SM event (spec.md §4.1 —
/// `Connect`/`Disconnect` never change friendship state, only connection
/// status, so this is safe to run independently of any in-flight Op-SM
/// fan-out). Grounded in the teacher's `initialization::start_peer_discovery`
/// background-loop shape, generalized from a one-shot discovery pass into a
/// recurring liveness sweep.
fn spawn_peer_ping_task(env: Arc<Env>, port: u16, interval_secs: u64) {
    use glusterd_core::peer::FriendshipEvent;

    let http = HttpPeerRpc::new(port);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            for peer in env.peers.iter_befriended().await {
                let Some(uuid) = peer.uuid else { continue };
                let event = if http.ping(&peer).await {
                    FriendshipEvent::Connect
                } else {
                    FriendshipEvent::Disconnect
                };
                if let Err(e) = env.peers.apply_event(&uuid, event).await {
                    warn!("peer ping: failed to record {:?} for {}: {}", event, uuid, e);
                }
            }
        }
    });
}
