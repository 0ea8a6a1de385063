//! Built, immutable processing graph.

use crate::builder::NodeKey;
use crate::connection::Connection;
use crate::node::{NodeId, NodeType, WorldNode};
use crate::schedule::{self, ParallelPlan};
use crate::Result;
use etude_core::compat::{Mutex, MutexGuard};
use std::fmt::Write as _;

/// Snapshot of a builder's nodes and connections with its execution schedule.
///
/// The topology never changes. Node state (backend binding, merge readiness,
/// collected output) lives behind a per-node lock so that nodes of one
/// parallel group can run at the same time.
pub struct WorldGraph {
    nodes: Vec<Mutex<WorldNode>>,
    keys: Vec<NodeKey>,
    connections: Vec<Connection>,
    order: Vec<NodeId>,
    plan: ParallelPlan,
}

impl WorldGraph {
    pub(crate) fn new(
        nodes: Vec<WorldNode>,
        keys: Vec<NodeKey>,
        connections: Vec<Connection>,
        plan: Option<ParallelPlan>,
    ) -> Result<Self> {
        let count = nodes.len();
        let plan = match plan {
            Some(plan) => plan,
            None => ParallelPlan::from_groups(schedule::level_groups(count, &connections)?),
        };
        let order = schedule::topological_sort(count, &connections)?;
        Ok(Self {
            nodes: nodes.into_iter().map(Mutex::new).collect(),
            keys,
            connections,
            order,
            plan,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections leaving `id`.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.source == id)
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.dest == id)
    }

    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn parallel_plan(&self) -> &ParallelPlan {
        &self.plan
    }

    pub fn key_of(&self, id: NodeId) -> Option<NodeKey> {
        self.keys.get(id).copied()
    }

    pub fn index_of(&self, key: NodeKey) -> Option<NodeId> {
        self.keys.iter().position(|&k| k == key)
    }

    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.nodes.get(id).map(|n| n.lock().node_type())
    }

    /// Clone of node `id` in its current state.
    pub fn node_snapshot(&self, id: NodeId) -> Option<WorldNode> {
        self.nodes.get(id).map(|n| n.lock().clone())
    }

    /// Ids of every node of `node_type`.
    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| self.node_type(id) == Some(node_type))
            .collect()
    }

    pub(crate) fn lock(&self, id: NodeId) -> Option<MutexGuard<'_, WorldNode>> {
        self.nodes.get(id).map(|n| n.lock())
    }

    /// Graphviz rendering for diagnostics.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph world {\n    rankdir=LR;\n");
        for (id, node) in self.nodes.iter().enumerate() {
            let node = node.lock();
            let _ = writeln!(
                dot,
                "    n{id} [label=\"{}\\n{}\"];",
                node.name().replace('"', "'"),
                node.node_type()
            );
        }
        for c in &self.connections {
            let _ = writeln!(
                dot,
                "    n{} -> n{} [label=\"{}:{}\"];",
                c.source, c.dest, c.source_port, c.dest_port
            );
        }
        dot.push('}');
        dot.push('\n');
        dot
    }
}

impl Drop for WorldGraph {
    fn drop(&mut self) {
        for node in &mut self.nodes {
            node.get_mut().cleanup();
        }
    }
}

impl std::fmt::Debug for WorldGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGraph")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("groups", &self.plan.groups)
            .finish()
    }
}
