//! `build_server`: the brick-side graph (spec.md §4.4 "Server graph").
//!
//! ```text
//! storage/posix[directory, volume-id]
//!   -> features/access-control -> features/locks -> performance/io-threads
//!   -> (optional) cluster/pump <- protocol/client[replace-brick remote]
//!   -> features/marker[volume-uuid, timestamp-file, xtime, quota]
//!   -> debug/io-stats[path-as-name]
//!   -> protocol/server[transport-type, auth.addr.*.allow fan-out]
//! ```

use crate::volume::{TransportType, Volume};

use super::{Graph, GraphBuilder, VolfileError};

/// A replace-brick migration in progress (spec.md S3): the destination the
/// `cluster/pump` translator mounts as a maintenance client.
pub struct ReplaceBrickInProgress<'a> {
    pub dst_host: &'a str,
    pub dst_path: &'a str,
    pub dst_port: u16,
}

pub struct ServerOverrides<'a> {
    pub xtime: bool,
    pub quota: bool,
    pub gsync_active: bool,
    pub replace_brick: Option<ReplaceBrickInProgress<'a>>,
}

impl Default for ServerOverrides<'_> {
    fn default() -> Self {
        Self {
            xtime: false,
            quota: false,
            gsync_active: false,
            replace_brick: None,
        }
    }
}

pub fn build_server(
    vol: &Volume,
    brick_path: &str,
    overrides: &ServerOverrides,
) -> Result<Graph, VolfileError> {
    // The transition check (old value -> new value) happens in opsm's
    // stage_set handler, which has both values; here we just refuse to
    // silently emit a graph with xtime off while gsync is active.
    if overrides.gsync_active && !overrides.xtime {
        return Err(VolfileError::GeoReplicationActive);
    }

    let mut b = GraphBuilder::new();
    let posix_name = format!("{}-posix", vol.name);
    b.add_leaf(
        "storage/posix",
        posix_name,
        vec![
            ("directory".to_string(), brick_path.to_string()),
            ("volume-id".to_string(), vol.uuid.to_string()),
        ],
    );
    b.add("features/access-control", format!("{}-access-control", vol.name), vec![])?;
    b.add("features/locks", format!("{}-locks", vol.name), vec![])?;
    b.add("performance/io-threads", format!("{}-io-threads", vol.name), vec![])?;

    if let Some(rb) = &overrides.replace_brick {
        let primary = b.current();
        let remote = b.add_leaf(
            "protocol/client",
            format!("{}-replace-brick-remote", vol.name),
            vec![
                ("remote-host".to_string(), rb.dst_host.to_string()),
                ("remote-subvolume".to_string(), rb.dst_path.to_string()),
                ("remote-port".to_string(), rb.dst_port.to_string()),
            ],
        );
        // cluster/pump takes the current server-side chain as its primary
        // child and the maintenance client as its secondary (spec.md S3).
        if let Some(primary) = primary {
            b.add_with_children(
                "cluster/pump",
                format!("{}-pump", vol.name),
                vec![],
                vec![primary, remote],
            )?;
        }
    }

    b.add(
        "features/marker",
        format!("{}-marker", vol.name),
        vec![
            ("volume-uuid".to_string(), vol.uuid.to_string()),
            ("timestamp-file".to_string(), format!("{}.timestamp", vol.name)),
            ("xtime".to_string(), on_off(overrides.xtime)),
            ("quota".to_string(), on_off(overrides.quota)),
        ],
    )?;
    b.add("debug/io-stats", brick_path.to_string(), vec![])?;

    let server_idx = b.add(
        "protocol/server",
        format!("{}-server", vol.name),
        vec![("transport-type".to_string(), transport_str(vol.transport).to_string())],
    )?;

    let allow = vol
        .options
        .get("auth.allow")
        .cloned()
        .unwrap_or_else(|| "*".to_string());
    let graph = b.finish();
    Ok(apply_auth_fanout(graph, server_idx, &allow))
}

/// Iterates every child of the server translator and writes
/// `auth.addr.<child>.allow = <value>` (spec.md §4.4 "auth.addr.* fan-out").
fn apply_auth_fanout(mut graph: Graph, server_idx: usize, allow: &str) -> Graph {
    let children = graph.nodes()[server_idx].children.clone();
    for child_idx in children {
        let child_name = graph.nodes()[child_idx].name.clone();
        graph
            .node_mut(server_idx)
            .options
            .push((format!("auth.addr.{}.allow", child_name), allow.to_string()));
    }
    graph
}

fn on_off(b: bool) -> String {
    if b { "on".to_string() } else { "off".to_string() }
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
    use crate::volume::VolumeType;

    #[test]
    fn server_graph_ends_in_protocol_server_with_auth_fanout() {
        let vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        let graph = build_server(&vol, "/data/b1", &ServerOverrides::default()).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.xlator_type, "protocol/server");
        assert!(root.options.iter().any(|(k, _)| k.starts_with("auth.addr.")));
    }

    #[test]
    fn xtime_off_during_gsync_is_rejected() {
        let vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        let overrides = ServerOverrides { xtime: false, gsync_active: true, ..Default::default() };
        let err = build_server(&vol, "/data/b1", &overrides);
        assert!(matches!(err, Err(VolfileError::GeoReplicationActive)));
    }
}
