//! `build_nfs`: the NFS server's aggregate graph (spec.md §4.4 "build_nfs").
//!
//! A single `nfs/server` root with `nfs.dynamic-volumes=on` and, spliced in
//! beneath it, one client subgraph per started volume that does not carry
//! `nfs.disable=on` — each built with `NFS_PERF` rather than the ordinary
//! client default, per spec.md's note that NFS re-exports disable the
//! client-side performance translators by default.

use crate::volume::{Volume, VolumeStatus};

use super::client::{build_client, NFS_PERF};
use super::{Graph, GraphBuilder, VolfileError};

pub fn build_nfs(volumes: &[Volume]) -> Result<Graph, VolfileError> {
    let mut b = GraphBuilder::new();

    let eligible: Vec<&Volume> = volumes
        .iter()
        .filter(|v| v.status == VolumeStatus::Started)
        .filter(|v| !v.options.get("nfs.disable").map(|v| v == "on").unwrap_or(false))
        .collect();

    for vol in &eligible {
        let sub = build_client(vol, vol.transport, NFS_PERF)?;
        b.splice_in(sub);
    }

    let allow = volumes
        .iter()
        .find_map(|v| v.options.get("nfs.rpc-auth-allow").cloned());

    let mut opts = vec![("nfs.dynamic-volumes".to_string(), "on".to_string())];
    if let Some(allow) = allow {
        opts.push(("nfs3.rpc-auth-allow".to_string(), allow));
    }

    let children = b.cursor();
    let root = b.add_with_children("nfs/server", "nfs-server", opts, children)?;
    Ok(b.finish_at(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Brick, TransportType, VolumeType};

    fn started_volume(name: &str) -> Volume {
        let mut vol = Volume::new(name, VolumeType::Distribute, TransportType::Tcp);
        vol.status = VolumeStatus::Started;
        vol.bricks = vec![Brick::new("h1", "/d/b1").unwrap()];
        vol
    }

    #[test]
    fn roots_under_nfs_server_with_dynamic_volumes_on() {
        let vol = started_volume("v1");
        let graph = build_nfs(&[vol]).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.xlator_type, "nfs/server");
        assert!(root.options.iter().any(|(k, v)| k == "nfs.dynamic-volumes" && v == "on"));
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn disabled_volumes_are_excluded() {
        let mut vol = started_volume("v1");
        vol.options.insert("nfs.disable".to_string(), "on".to_string());
        let graph = build_nfs(&[vol]).unwrap();
        assert_eq!(graph.root().unwrap().children.len(), 0);
    }

    #[test]
    fn stopped_volumes_are_excluded() {
        let mut vol = started_volume("v1");
        vol.status = VolumeStatus::Stopped;
        let graph = build_nfs(&[vol]).unwrap();
        assert_eq!(graph.root().unwrap().children.len(), 0);
    }
}
