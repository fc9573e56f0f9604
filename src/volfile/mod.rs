//! Volfile Generator (spec component C4 — "the hardest subsystem"):
//! `build_server`, `build_client`, `build_nfs`, `build_shd`,
//! `build_rebalance` (spec.md §4.4).
//!
//! Has no teacher analogue (a PaaS app graph is not a translator DAG), so
//! the graph itself is modeled on spec.md §9's "Re-architecture guidance
//! for cycles" applied to a second cyclic-in-the-source structure: nodes
//! live in one arena `Vec<Node>` and reference children by index, never by
//! pointer. Because every node is pushed onto that `Vec` only after all of
//! its children already exist, the arena order *is* the leaves-first order
//! spec.md's serialization needs — no separate topological sort required.

mod client;
mod filters;
mod nfs;
mod rebalance;
mod server;
mod shd;

pub use client::{build_client, build_client_for_volume, PerfPolicy, DEFAULT_PERF, NFS_PERF};
pub use filters::apply_filters;
pub use nfs::build_nfs;
pub use rebalance::build_rebalance;
pub use server::{build_server, ReplaceBrickInProgress, ServerOverrides};
pub use shd::build_shd;

use std::collections::VecDeque;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolfileError {
    #[error("cluster translator window of {requested} exceeds {available} available leaves")]
    NotEnoughLeaves { requested: usize, available: usize },

    #[error("brick count {count} is not divisible by stripe*replica window {window}")]
    IndivisibleWindow { count: usize, window: usize },

    #[error("features.marker xtime cannot be disabled while a geo-replication session is active")]
    GeoReplicationActive,

    #[error("io error serializing volfile to {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single translator instance: a unique name, a namespaced type such as
/// `cluster/replicate`, an ordered options map, and its children by arena
/// index (spec.md §3 "Volfile").
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub xlator_type: String,
    pub options: Vec<(String, String)>,
    pub children: Vec<usize>,
}

/// The translator DAG, stored leaves-first. `roots` names the top-level
/// node(s) to serialize from — ordinarily one, but `build_nfs`/`build_shd`
/// produce a single synthetic root whose children are a subgraph per
/// volume, so `roots` always has exactly one entry in practice; it is a
/// `Vec` only to keep `Graph` honest about "the root is the 'first' node"
/// being a property of the *builder*, not an inherent limit of the type.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> Option<&Node> {
        self.roots.last().map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Emit `volume NAME / type T / option K V / subvolumes C1 C2 / end-volume`
    /// blocks leaves-first, with a blank line between blocks — the arena
    /// order already is leaves-first (spec.md §4.4 "Serialization").
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            out.push_str(&format!("volume {}\n", node.name));
            out.push_str(&format!("    type {}\n", node.xlator_type));
            for (k, v) in &node.options {
                out.push_str(&format!("    option {} {}\n", k, v));
            }
            if !node.children.is_empty() {
                let names: Vec<&str> = node
                    .children
                    .iter()
                    .map(|&i| self.nodes[i].name.as_str())
                    .collect();
                out.push_str(&format!("    subvolumes {}\n", names.join(" ")));
            }
            out.push_str("end-volume\n\n");
        }
        out
    }

    /// Every node reachable from a given starting node (used by the
    /// distribute translator's recursive decommissioned-brick search,
    /// spec.md §4.4).
    pub fn descendants(&self, start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.nodes[i].children.iter().copied());
        }
        out
    }
}

/// Builds a `Graph` by successive `add`/`add_cluster` calls, each of which
/// prepends a node and links it to a window of the current "leaves cursor"
/// (spec.md §4.4 "Composition model").
pub struct GraphBuilder {
    nodes: Vec<Node>,
    cursor: VecDeque<usize>,
    first: Option<usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            cursor: VecDeque::new(),
            first: None,
        }
    }

    /// A node with no children — e.g. `storage/posix` or a `protocol/client`
    /// instance. Becomes a new leaf available to the next cluster window.
    pub fn add_leaf(
        &mut self,
        xlator_type: impl Into<String>,
        name: impl Into<String>,
        options: Vec<(String, String)>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.into(),
            xlator_type: xlator_type.into(),
            options,
            children: Vec::new(),
        });
        self.cursor.push_back(idx);
        self.first = Some(idx);
        idx
    }

    /// Wrap the current `first` node in a new unary node (e.g. `features/locks`
    /// atop `storage/posix`). The cursor collapses to just the new node.
    pub fn add(
        &mut self,
        xlator_type: impl Into<String>,
        name: impl Into<String>,
        options: Vec<(String, String)>,
    ) -> Result<usize, VolfileError> {
        let child = self
            .first
            .ok_or(VolfileError::NotEnoughLeaves { requested: 1, available: 0 })?;
        self.add_with_children(xlator_type, name, options, vec![child])
    }

    /// Primitive used by `add`/`add_cluster`/callers that need an explicit,
    /// non-windowed child list (e.g. `cluster/pump`'s primary chain plus its
    /// maintenance-client secondary, spec.md S3).
    pub fn add_with_children(
        &mut self,
        xlator_type: impl Into<String>,
        name: impl Into<String>,
        options: Vec<(String, String)>,
        children: Vec<usize>,
    ) -> Result<usize, VolfileError> {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.into(),
            xlator_type: xlator_type.into(),
            options,
            children,
        });
        self.cursor.clear();
        self.cursor.push_back(idx);
        self.first = Some(idx);
        Ok(idx)
    }

    /// A cluster translator (replicate/stripe/distribute): takes the next
    /// `child_count` leaves off the cursor and links the new node to them
    /// (spec.md §4.4). Called repeatedly to produce one node per group; the
    /// produced nodes become the new leaves available to the next layer.
    pub fn add_cluster(
        &mut self,
        xlator_type: impl Into<String>,
        name: impl Into<String>,
        options: Vec<(String, String)>,
        child_count: usize,
    ) -> Result<usize, VolfileError> {
        if self.cursor.len() < child_count {
            return Err(VolfileError::NotEnoughLeaves {
                requested: child_count,
                available: self.cursor.len(),
            });
        }
        let children: Vec<usize> = (0..child_count).map(|_| self.cursor.pop_front().unwrap()).collect();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.into(),
            xlator_type: xlator_type.into(),
            options,
            children,
        });
        self.cursor.push_back(idx);
        self.first = Some(idx);
        Ok(idx)
    }

    /// Splice a fully-built subgraph into this one's arena (used by
    /// `build_nfs`/`build_shd` to hang one per-volume chain off a shared
    /// top node). Returns the re-indexed root of `other` in this arena.
    pub fn splice_in(&mut self, other: Graph) -> usize {
        let offset = self.nodes.len();
        for mut node in other.nodes {
            for child in &mut node.children {
                *child += offset;
            }
            self.nodes.push(node);
        }
        let other_root = other.roots.last().copied().unwrap_or(0) + offset;
        self.cursor.push_back(other_root);
        other_root
    }

    pub fn leaves(&self) -> usize {
        self.cursor.len()
    }

    /// The nodes built so far, for callers that need to inspect the graph
    /// before `finish()` (e.g. a recursive descendant search over the
    /// current cursor window).
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The arena indices currently available as the next cluster window, in
    /// order.
    pub fn cursor(&self) -> Vec<usize> {
        self.cursor.iter().copied().collect()
    }

    /// Every node reachable from `start`, walking the builder's in-progress
    /// arena (mirrors `Graph::descendants`).
    pub fn descendants(&self, start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.nodes[i].children.iter().copied());
        }
        out
    }

    /// The most recently added node (the chain's current "first"), if any.
    pub fn current(&self) -> Option<usize> {
        self.first
    }

    pub fn finish(self) -> Graph {
        let roots = self.first.into_iter().collect();
        Graph { nodes: self.nodes, roots }
    }

    /// Like `finish`, but names an explicit root (used when the top node
    /// has more children than the synthetic "first" tracking would show,
    /// e.g. the merged nfs/shd case).
    pub fn finish_at(self, root: usize) -> Graph {
        Graph { nodes: self.nodes, roots: vec![root] }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_chain_serializes_leaves_first() {
        let mut b = GraphBuilder::new();
        b.add_leaf("storage/posix", "v1-posix", vec![("directory".into(), "/d".into())]);
        b.add("debug/io-stats", "v1", vec![]).unwrap();
        let g = b.finish();
        let text = g.serialize();
        let posix_pos = text.find("volume v1-posix").unwrap();
        let root_pos = text.find("volume v1\n").unwrap();
        assert!(posix_pos < root_pos, "leaves must be emitted before the root");
        assert!(text.contains("subvolumes v1-posix"));
    }

    #[test]
    fn cluster_window_consumes_exact_count() {
        let mut b = GraphBuilder::new();
        b.add_leaf("protocol/client", "v-client-0", vec![]);
        b.add_leaf("protocol/client", "v-client-1", vec![]);
        let rep = b.add_cluster("cluster/replicate", "v-replicate-0", vec![], 2).unwrap();
        let g = b.finish();
        assert_eq!(g.nodes()[rep].children.len(), 2);
    }

    #[test]
    fn not_enough_leaves_is_rejected() {
        let mut b = GraphBuilder::new();
        b.add_leaf("protocol/client", "v-client-0", vec![]);
        let err = b.add_cluster("cluster/replicate", "v-replicate-0", vec![], 2);
        assert!(matches!(err, Err(VolfileError::NotEnoughLeaves { .. })));
    }
}
