//! `build_client`: the access-side graph (spec.md §4.4 "Client graph").
//!
//! Per brick a `protocol/client`; grouped bottom-up into `cluster/replicate`
//! groups of `replica_count`, then `cluster/stripe` groups of
//! `stripe_count` (or both, for stripe-replicate), then a single
//! `cluster/distribute` if there is more than one resulting subvolume,
//! then the performance chain (toggled by the `!perf` option family),
//! terminated by a volume-named `debug/io-stats` root.

use crate::volume::{TransportType, Volume, VolumeType};

use super::{Graph, GraphBuilder, VolfileError};

/// Which performance translators are present by default, before volume
/// options override them (spec.md §4.4: "the performance chain whose
/// presence is controlled by the `!perf` special options").
#[derive(Debug, Clone, Copy)]
pub struct PerfPolicy {
    pub write_behind: bool,
    pub read_ahead: bool,
    pub io_cache: bool,
    pub quick_read: bool,
    pub stat_prefetch: bool,
    pub client_io_threads: bool,
}

/// Default client-side policy: every perf xlator on except client-side
/// io-threads (spec.md §4.2 OPTION_MAP defaults).
pub const DEFAULT_PERF: PerfPolicy = PerfPolicy {
    write_behind: true,
    read_ahead: true,
    io_cache: true,
    quick_read: true,
    stat_prefetch: true,
    client_io_threads: false,
};

/// NFS's policy (spec.md §4.4 "build_nfs"): all perf xlators off by default
/// except write-behind.
pub const NFS_PERF: PerfPolicy = PerfPolicy {
    write_behind: true,
    read_ahead: false,
    io_cache: false,
    quick_read: false,
    stat_prefetch: false,
    client_io_threads: false,
};

fn resolved_perf(vol: &Volume, default: PerfPolicy) -> PerfPolicy {
    let flag = |key: &str, fallback: bool| -> bool {
        vol.options
            .get(key)
            .and_then(|v| crate::volume::options::parse_bool(v).ok())
            .unwrap_or(fallback)
    };
    PerfPolicy {
        write_behind: flag("performance.write-behind", default.write_behind),
        read_ahead: flag("performance.read-ahead", default.read_ahead),
        io_cache: flag("performance.io-cache", default.io_cache),
        quick_read: flag("performance.quick-read", default.quick_read),
        stat_prefetch: flag("performance.stat-prefetch", default.stat_prefetch),
        client_io_threads: flag("performance.client-io-threads", default.client_io_threads),
    }
}

pub fn build_client(vol: &Volume, transport: TransportType, perf: PerfPolicy) -> Result<Graph, VolfileError> {
    let mut b = GraphBuilder::new();

    for (i, brick) in vol.bricks.iter().enumerate() {
        b.add_leaf(
            "protocol/client",
            format!("{}-client-{}", vol.name, i),
            vec![
                ("remote-host".to_string(), brick.hostname.clone()),
                ("remote-subvolume".to_string(), brick.path.clone()),
                ("transport-type".to_string(), transport_str(transport).to_string()),
            ],
        );
    }
    let decommissioned: std::collections::HashSet<&str> = vol
        .bricks
        .iter()
        .filter(|brick| brick.decommissioned)
        .map(|brick| brick.path.as_str())
        .collect();

    let replica = vol.replica_count.max(1);
    let stripe = vol.stripe_count.max(1);

    match vol.kind {
        VolumeType::Replicate => {
            group_cluster(&mut b, vol.bricks.len(), replica, "cluster/replicate", "replicate", &vol.name)?;
        }
        VolumeType::Stripe => {
            group_cluster(&mut b, vol.bricks.len(), stripe, "cluster/stripe", "stripe", &vol.name)?;
        }
        VolumeType::StripeReplicate => {
            let window = stripe * replica;
            if vol.bricks.len() % window != 0 {
                return Err(VolfileError::IndivisibleWindow {
                    count: vol.bricks.len(),
                    window,
                });
            }
            group_cluster(&mut b, vol.bricks.len(), replica, "cluster/replicate", "replicate", &vol.name)?;
            let groups_after_replicate = vol.bricks.len() / replica;
            group_cluster(&mut b, groups_after_replicate, stripe, "cluster/stripe", "stripe", &vol.name)?;
        }
        VolumeType::None | VolumeType::Distribute => {}
    }

    let dist_leaf_count = vol.dist_leaf_count.max(1);
    let subvol_count = b.leaves();
    let dist_count = if dist_leaf_count > 0 { subvol_count / dist_leaf_count.max(1) } else { 1 };
    if dist_count > 1 && subvol_count > 1 {
        let candidates = b.cursor();
        let mut decommissioned_children = Vec::new();
        for &child in &candidates {
            let has_decommissioned_descendant = b.descendants(child).into_iter().any(|idx| {
                b.nodes()[idx]
                    .options
                    .iter()
                    .any(|(k, v)| k == "remote-subvolume" && decommissioned.contains(v.as_str()))
            });
            if has_decommissioned_descendant {
                decommissioned_children.push(b.nodes()[child].name.clone());
            }
        }
        let mut opts = Vec::new();
        if !decommissioned_children.is_empty() {
            opts.push(("decommissioned-bricks".to_string(), decommissioned_children.join(" ")));
        }
        b.add_cluster("cluster/distribute", format!("{}-dht", vol.name), opts, subvol_count)?;
    }

    if vol.options.get("features.quota").map(|v| v == "on").unwrap_or(false) {
        b.add("features/quota", format!("{}-quota", vol.name), vec![])?;
    }

    if perf.write_behind {
        b.add("performance/write-behind", format!("{}-write-behind", vol.name), vec![])?;
    }
    if perf.read_ahead {
        b.add("performance/read-ahead", format!("{}-read-ahead", vol.name), vec![])?;
    }
    if perf.io_cache {
        b.add("performance/io-cache", format!("{}-io-cache", vol.name), vec![])?;
    }
    if perf.quick_read {
        b.add("performance/quick-read", format!("{}-quick-read-2", vol.name), vec![])?;
    }
    if perf.stat_prefetch {
        b.add("performance/stat-prefetch", format!("{}-stat-prefetch", vol.name), vec![])?;
    }
    if perf.client_io_threads {
        b.add("performance/io-threads", format!("{}-client-io-threads", vol.name), vec![])?;
    }

    b.add("debug/io-stats", vol.name.clone(), vec![])?;
    Ok(b.finish())
}

/// Build `build_client` with the volume's own stored option overrides
/// applied atop `default` (spec.md §4.2: defaults applied at generation
/// time, never written into the dict).
pub fn build_client_for_volume(vol: &Volume, default: PerfPolicy) -> Result<Graph, VolfileError> {
    build_client(vol, vol.transport, resolved_perf(vol, default))
}

fn group_cluster(
    b: &mut GraphBuilder,
    total: usize,
    window: usize,
    xlator_type: &str,
    label: &str,
    vol_name: &str,
) -> Result<(), VolfileError> {
    if window <= 1 || total == 0 {
        return Ok(());
    }
    if total % window != 0 {
        return Err(VolfileError::IndivisibleWindow { count: total, window });
    }
    for g in 0..(total / window) {
        b.add_cluster(xlator_type, format!("{}-{}-{}", vol_name, label, g), vec![], window)?;
    }
    Ok(())
}

fn transport_str(t: TransportType) -> &'static str {
    match t {
        TransportType::Tcp => "tcp",
        TransportType::Rdma => "rdma",
        TransportType::Both => "tcp,rdma",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Brick;

    fn distribute_volume(n: usize) -> Volume {
        let mut vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        vol.dist_leaf_count = 1;
        vol.bricks = (0..n).map(|i| Brick::new("h1", format!("/d/b{}", i)).unwrap()).collect();
        vol
    }

    #[test]
    fn plain_distribute_inserts_dht_over_all_bricks() {
        let vol = distribute_volume(3);
        let graph = build_client(&vol, TransportType::Tcp, DEFAULT_PERF).unwrap();
        assert!(graph.nodes().iter().any(|n| n.xlator_type == "cluster/distribute"));
    }

    #[test]
    fn single_brick_has_no_distribute_node() {
        let vol = distribute_volume(1);
        let graph = build_client(&vol, TransportType::Tcp, DEFAULT_PERF).unwrap();
        assert!(!graph.nodes().iter().any(|n| n.xlator_type == "cluster/distribute"));
    }

    #[test]
    fn replicate_groups_then_distributes() {
        let mut vol = distribute_volume(4);
        vol.kind = VolumeType::Replicate;
        vol.replica_count = 2;
        let graph = build_client(&vol, TransportType::Tcp, DEFAULT_PERF).unwrap();
        let replicate_nodes: Vec<_> = graph.nodes().iter().filter(|n| n.xlator_type == "cluster/replicate").collect();
        assert_eq!(replicate_nodes.len(), 2);
        assert!(graph.nodes().iter().any(|n| n.xlator_type == "cluster/distribute"));
    }

    #[test]
    fn graph_generation_is_idempotent() {
        let vol = distribute_volume(3);
        let a = build_client(&vol, TransportType::Tcp, DEFAULT_PERF).unwrap().serialize();
        let b = build_client(&vol, TransportType::Tcp, DEFAULT_PERF).unwrap().serialize();
        assert_eq!(a, b);
    }

    #[test]
    fn perf_chain_respects_policy_toggles() {
        let vol = distribute_volume(1);
        let graph = build_client(&vol, TransportType::Tcp, NFS_PERF).unwrap();
        assert!(graph.nodes().iter().any(|n| n.xlator_type == "performance/write-behind"));
        assert!(!graph.nodes().iter().any(|n| n.xlator_type == "performance/read-ahead"));
    }
}
