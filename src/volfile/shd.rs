//! `build_shd`: the self-heal daemon's aggregate graph (spec.md §4.4
//! "build_shd").
//!
//! One client subgraph per replicate-family volume, each wrapped in its own
//! `cluster/replicate` with self-heal forced on regardless of the volume's
//! stored options, spliced beneath a single `glustershd`-named
//! `debug/io-stats` root.

use crate::volume::{TransportType, Volume, VolumeStatus, VolumeType};

use super::client::{build_client, DEFAULT_PERF};
use super::{Graph, GraphBuilder, VolfileError};

const FORCED_OPTIONS: &[(&str, &str)] = &[
    ("cluster.background-self-heal-count", "0"),
    ("cluster.data-self-heal", "on"),
];

pub fn build_shd(volumes: &[Volume]) -> Result<Graph, VolfileError> {
    let mut b = GraphBuilder::new();

    let replicate_volumes: Vec<&Volume> = volumes
        .iter()
        .filter(|v| v.status == VolumeStatus::Started)
        .filter(|v| matches!(v.kind, VolumeType::Replicate | VolumeType::StripeReplicate))
        .collect();

    let mut per_volume_roots = Vec::with_capacity(replicate_volumes.len());
    for vol in &replicate_volumes {
        let sub = build_client(vol, TransportType::Tcp, DEFAULT_PERF)?;
        let spliced_root = b.splice_in(sub);
        let wrapped = b.add_with_children(
            "cluster/replicate",
            format!("{}-shd-replicate", vol.name),
            FORCED_OPTIONS.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            vec![spliced_root],
        )?;
        per_volume_roots.push(wrapped);
    }

    let root = b.add_with_children("debug/io-stats", "glustershd", vec![], per_volume_roots)?;
    Ok(b.finish_at(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Brick;

    fn replicate_volume(name: &str) -> Volume {
        let mut vol = Volume::new(name, VolumeType::Replicate, TransportType::Tcp);
        vol.replica_count = 2;
        vol.status = VolumeStatus::Started;
        vol.bricks = vec![
            Brick::new("h1", "/d/b1").unwrap(),
            Brick::new("h2", "/d/b2").unwrap(),
        ];
        vol
    }

    #[test]
    fn root_is_named_glustershd() {
        let graph = build_shd(&[replicate_volume("v1")]).unwrap();
        assert_eq!(graph.root().unwrap().name, "glustershd");
        assert_eq!(graph.root().unwrap().xlator_type, "debug/io-stats");
    }

    #[test]
    fn distribute_only_volumes_are_excluded() {
        let mut vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        vol.status = VolumeStatus::Started;
        vol.bricks = vec![Brick::new("h1", "/d/b1").unwrap()];
        let graph = build_shd(&[vol]).unwrap();
        assert_eq!(graph.root().unwrap().children.len(), 0);
    }

    #[test]
    fn self_heal_options_are_forced_regardless_of_volume_settings() {
        let mut vol = replicate_volume("v1");
        vol.options.insert("cluster.background-self-heal-count".to_string(), "32".to_string());
        let graph = build_shd(&[vol]).unwrap();
        let shd_replicate = graph
            .nodes()
            .iter()
            .find(|n| n.xlator_type == "cluster/replicate" && n.name.ends_with("-shd-replicate"))
            .unwrap();
        assert!(shd_replicate
            .options
            .iter()
            .any(|(k, v)| k == "cluster.background-self-heal-count" && v == "0"));
    }
}
