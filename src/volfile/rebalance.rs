//! `build_rebalance`: the stand-alone DHT-crawler graph (spec.md §4.4
//! contract; SPEC_FULL.md's rebalance-status supplement).
//!
//! The rebalance process only needs the layout/distribute view of a
//! volume to walk and migrate files — none of the client-side performance
//! translators apply, since a migration crawl does no caching.

use crate::volume::Volume;

use super::client::{build_client, PerfPolicy};
use super::{Graph, VolfileError};

const NO_PERF: PerfPolicy = PerfPolicy {
    write_behind: false,
    read_ahead: false,
    io_cache: false,
    quick_read: false,
    stat_prefetch: false,
    client_io_threads: false,
};

pub fn build_rebalance(vol: &Volume) -> Result<Graph, VolfileError> {
    build_client(vol, vol.transport, NO_PERF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Brick, TransportType, VolumeType};

    #[test]
    fn rebalance_graph_carries_no_performance_xlators() {
        let mut vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        vol.bricks = vec![
            Brick::new("h1", "/d/b1").unwrap(),
            Brick::new("h2", "/d/b2").unwrap(),
        ];
        let graph = build_rebalance(&vol).unwrap();
        assert!(!graph.nodes().iter().any(|n| n.xlator_type.starts_with("performance/")));
        assert!(graph.nodes().iter().any(|n| n.xlator_type == "cluster/distribute"));
    }
}
