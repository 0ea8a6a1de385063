//! Mutable graph construction.
//!
//! [`GraphBuilder`] owns a capacity-bounded node and connection set plus the
//! arena the nodes are charged to. Once [`build`](GraphBuilder::build) has
//! produced a [`WorldGraph`], every mutation fails with `InvalidState` until
//! [`rebuild`](GraphBuilder::rebuild) or [`clear`](GraphBuilder::clear).
//!
//! Node ids are dense indices. Removing a node moves the last node into the
//! freed slot and rewrites every connection that referenced the old last
//! index. Callers that need a handle surviving removals and reordering use
//! [`NodeKey`].

use crate::config::BuilderConfig;
use crate::connection::{Connection, DEFAULT_BUFFER_SIZE};
use crate::diagram::{Block, BlockDiagram, BlockId};
use crate::error::ValidationError;
use crate::graph::WorldGraph;
use crate::node::{NodeId, NodeType, WorldNode};
use crate::schedule::{self, ParallelPlan};
use crate::{Error, Result};
use etude_core::compat::HashMap;
use etude_core::MemoryPool;
use std::fmt;
use std::sync::Arc;

/// Extra node and connection slots a diagram conversion reserves.
const DIAGRAM_HEADROOM: usize = 10;

/// Stable handle of a node. Never reused within one builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How diagram conversion decides a block's node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassificationPolicy {
    /// Substring match on the block name; anything unmatched becomes an
    /// audio input.
    #[default]
    NameSubstring,
    /// The block's explicit type when it has one, otherwise the name match.
    ExplicitType,
}

/// Name fragments recognised by [`ClassificationPolicy::NameSubstring`], in match order.
const NAME_PATTERNS: [(&str, NodeType); 5] = [
    ("f0_extraction", NodeType::F0Extraction),
    ("spectrum_analysis", NodeType::SpectrumAnalysis),
    ("aperiodicity_analysis", NodeType::AperiodicityAnalysis),
    ("synthesis", NodeType::Synthesis),
    ("audio_output", NodeType::AudioOutput),
];

/// Node type of `block` under `policy`.
pub fn classify_block(block: &Block, policy: ClassificationPolicy) -> NodeType {
    if policy == ClassificationPolicy::ExplicitType {
        if let Some(node_type) = block.node_type() {
            return node_type;
        }
    }
    match NAME_PATTERNS
        .iter()
        .find(|(pattern, _)| block.name().contains(pattern))
    {
        Some(&(_, node_type)) => node_type,
        None => {
            tracing::warn!(
                block = block.name(),
                "block name matches no node type, using AUDIO_INPUT"
            );
            NodeType::AudioInput
        }
    }
}

pub struct GraphBuilder {
    config: BuilderConfig,
    pool: MemoryPool,
    nodes: Vec<WorldNode>,
    keys: Vec<NodeKey>,
    next_key: u64,
    connections: Vec<Connection>,
    policy: ClassificationPolicy,
    source_diagram: Option<String>,
    plan: Option<ParallelPlan>,
    built: Option<Arc<WorldGraph>>,
}

impl GraphBuilder {
    pub fn new(config: BuilderConfig) -> Result<Self> {
        config.validate()?;
        let pool = MemoryPool::new(config.memory_pool_size)?;
        Ok(Self {
            nodes: Vec::with_capacity(config.max_nodes),
            keys: Vec::with_capacity(config.max_nodes),
            connections: Vec::with_capacity(config.max_connections),
            config,
            pool,
            next_key: 0,
            policy: ClassificationPolicy::default(),
            source_diagram: None,
            plan: None,
            built: None,
        })
    }

    /// Convert `diagram` with the legacy name-based classification.
    pub fn from_diagram(diagram: &BlockDiagram) -> Result<Self> {
        Self::from_diagram_with(diagram, ClassificationPolicy::NameSubstring)
    }

    /// Convert `diagram`. Disabled blocks and the connections touching them are skipped.
    ///
    /// Any failure discards the partial builder.
    pub fn from_diagram_with(diagram: &BlockDiagram, policy: ClassificationPolicy) -> Result<Self> {
        let config = BuilderConfig {
            max_nodes: diagram.block_count() + DIAGRAM_HEADROOM,
            max_connections: diagram.connection_count() + DIAGRAM_HEADROOM,
            ..BuilderConfig::default()
        };
        let mut builder = Self::new(config)?;
        builder.policy = policy;
        builder.source_diagram = Some(diagram.name().to_string());

        let mut ids: HashMap<BlockId, NodeId> = HashMap::with_capacity(diagram.block_count());
        for block in diagram.blocks() {
            if !block.is_enabled() {
                tracing::debug!(block = block.name(), "skipping disabled block");
                continue;
            }
            let node = builder.add_dsp_block(block)?;
            ids.insert(block.id(), node);
        }
        for c in diagram.connections() {
            let (Some(&src), Some(&dst)) = (ids.get(&c.source_block), ids.get(&c.dest_block)) else {
                tracing::debug!(connection = c.id, "skipping connection to a disabled block");
                continue;
            };
            builder.connect_nodes_with_buffer(src, c.source_port, dst, c.dest_port, c.buffer_size)?;
        }
        tracing::debug!(
            diagram = diagram.name(),
            nodes = builder.node_count(),
            connections = builder.connection_count(),
            "converted block diagram"
        );
        Ok(builder)
    }

    /// Add the node a single diagram block converts to.
    pub fn add_dsp_block(&mut self, block: &Block) -> Result<NodeId> {
        self.ensure_mutable("add a block")?;
        let node_type = classify_block(block, self.policy);
        let node = WorldNode::from_params(&self.pool, node_type, block.params())?
            .with_name(block.name());
        self.add_node(node)
    }

    /// Add a node of `node_type` with default settings.
    pub fn add_default_node(&mut self, node_type: NodeType) -> Result<NodeId> {
        self.ensure_mutable("add a node")?;
        let node = WorldNode::from_params(&self.pool, node_type, &Default::default())?;
        self.add_node(node)
    }

    pub fn add_node(&mut self, node: WorldNode) -> Result<NodeId> {
        self.ensure_mutable("add a node")?;
        if self.nodes.len() >= self.config.max_nodes {
            return Err(Error::OutOfMemory {
                requested: self.nodes.len() + 1,
                available: self.config.max_nodes,
            });
        }
        let id = self.nodes.len();
        tracing::debug!(id, node = node.name(), "added node");
        self.nodes.push(node);
        self.keys.push(NodeKey(self.next_key));
        self.next_key += 1;
        self.plan = None;
        Ok(id)
    }

    pub fn connect_nodes(
        &mut self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> Result<()> {
        self.connect_nodes_with_buffer(source, source_port, dest, dest_port, DEFAULT_BUFFER_SIZE)
    }

    /// Record a connection. Either the connection is fully recorded or nothing changes.
    pub fn connect_nodes_with_buffer(
        &mut self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
        buffer_size: usize,
    ) -> Result<()> {
        self.ensure_mutable("connect nodes")?;
        if self.connections.len() >= self.config.max_connections {
            return Err(Error::OutOfMemory {
                requested: self.connections.len() + 1,
                available: self.config.max_connections,
            });
        }
        self.check_endpoints(source, source_port, dest, dest_port)?;
        if buffer_size == 0 {
            return Err(Error::InvalidArgument("buffer_size must be non-zero".into()));
        }

        let connection =
            Connection::new(source, source_port, dest, dest_port).with_buffer_size(buffer_size);
        if let Some(existing) = self.connections.iter().find(|c| {
            c.same_endpoints(&connection) || (c.dest == dest && c.dest_port == dest_port)
        }) {
            return Err(Error::AlreadyExists(*existing));
        }
        self.connections.push(connection);
        self.plan = None;
        Ok(())
    }

    pub fn disconnect_nodes(
        &mut self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> Result<Connection> {
        self.ensure_mutable("disconnect nodes")?;
        let probe = Connection::new(source, source_port, dest, dest_port);
        let index = self
            .connections
            .iter()
            .position(|c| c.same_endpoints(&probe))
            .ok_or_else(|| Error::NotFound(format!("connection {probe}")))?;
        self.plan = None;
        Ok(self.connections.swap_remove(index))
    }

    pub fn has_connection(
        &self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> bool {
        let probe = Connection::new(source, source_port, dest, dest_port);
        self.connections.iter().any(|c| c.same_endpoints(&probe))
    }

    /// Whether `connect_nodes` with these arguments would be accepted on an unbuilt builder,
    /// port types included.
    pub fn is_valid_connection(
        &self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> bool {
        if self.check_endpoints(source, source_port, dest, dest_port).is_err() {
            return false;
        }
        let compatible = match (
            self.nodes[source].output_type(source_port),
            self.nodes[dest].input_type(dest_port),
        ) {
            (Some(out), Some(input)) => out.can_feed(input),
            _ => false,
        };
        compatible
            && !self
                .connections
                .iter()
                .any(|c| c.dest == dest && c.dest_port == dest_port)
    }

    /// Remove node `id` and every connection touching it.
    ///
    /// The last node moves into slot `id`; connections that referenced the
    /// old last index are rewritten to `id`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<WorldNode> {
        self.ensure_mutable("remove a node")?;
        if id >= self.nodes.len() {
            return Err(Error::InvalidArgument(format!(
                "node {id} out of range (0..{})",
                self.nodes.len()
            )));
        }

        for index in (0..self.connections.len()).rev() {
            if self.connections[index].touches(id) {
                self.connections.swap_remove(index);
            }
        }

        let last = self.nodes.len() - 1;
        let removed = self.nodes.swap_remove(id);
        self.keys.swap_remove(id);
        if id != last {
            for c in &mut self.connections {
                c.remap(last, id);
            }
        }
        self.plan = None;
        tracing::debug!(id, node = removed.name(), moved_from = last, "removed node");
        Ok(removed)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&WorldNode> {
        self.nodes.get(id)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Result<&mut WorldNode> {
        self.ensure_mutable("modify a node")?;
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    pub fn nodes(&self) -> &[WorldNode] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn key_of(&self, id: NodeId) -> Option<NodeKey> {
        self.keys.get(id).copied()
    }

    pub fn index_of(&self, key: NodeKey) -> Option<NodeId> {
        self.keys.iter().position(|&k| k == key)
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// The arena nodes for this builder are created in.
    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Bytes charged to the builder's arena.
    pub fn memory_usage(&self) -> usize {
        self.pool.used()
    }

    pub fn classification_policy(&self) -> ClassificationPolicy {
        self.policy
    }

    pub fn set_classification_policy(&mut self, policy: ClassificationPolicy) {
        self.policy = policy;
    }

    /// Name of the diagram this builder was converted from.
    pub fn source_diagram(&self) -> Option<&str> {
        self.source_diagram.as_deref()
    }

    /// Parallel plan recorded by the optimizer, if still current.
    pub fn parallel_plan(&self) -> Option<&ParallelPlan> {
        self.plan.as_ref()
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Run cycle detection, the connectivity check and the port type check, in that order.
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_rules();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "graph validation failed");
        }
        result.map_err(Error::from)
    }

    fn validate_rules(&self) -> std::result::Result<(), ValidationError> {
        let count = self.nodes.len();
        if let Some(node) = schedule::find_cycle(count, &self.connections) {
            return Err(ValidationError::Cycle { node });
        }

        if count >= 2 {
            let mut linked = vec![false; count];
            for c in &self.connections {
                linked[c.source] = true;
                linked[c.dest] = true;
            }
            if let Some(node) = linked.iter().position(|&l| !l) {
                return Err(ValidationError::Disconnected { node });
            }
            if let Some(node) = schedule::first_disconnected(count, &self.connections) {
                return Err(ValidationError::Disconnected { node });
            }
        }

        for c in &self.connections {
            let source_type = self.nodes[c.source].output_type(c.source_port);
            let dest_type = self.nodes[c.dest].input_type(c.dest_port);
            match (source_type, dest_type) {
                (Some(source_type), Some(dest_type)) if !source_type.can_feed(dest_type) => {
                    return Err(ValidationError::IncompatiblePorts {
                        src: c.source,
                        dst: c.dest,
                        source_type,
                        dest_type,
                    });
                }
                (Some(_), Some(_)) => {}
                _ => return Err(ValidationError::InvalidPort { connection: *c }),
            }
        }
        Ok(())
    }

    /// Produce the immutable graph. Returns the cached graph when already built.
    pub fn build(&mut self) -> Result<Arc<WorldGraph>> {
        if let Some(graph) = &self.built {
            return Ok(Arc::clone(graph));
        }
        if self.nodes.is_empty() {
            return Err(Error::InvalidState("cannot build an empty graph".into()));
        }
        if self.config.enable_validation {
            self.validate()?;
        }
        let plan = self
            .plan
            .clone()
            .filter(|p| p.is_valid(self.nodes.len(), &self.connections));
        let graph = Arc::new(WorldGraph::new(
            self.nodes.clone(),
            self.keys.clone(),
            self.connections.clone(),
            plan,
        )?);
        tracing::info!(
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            groups = graph.parallel_plan().group_count(),
            "graph built"
        );
        self.built = Some(Arc::clone(&graph));
        Ok(graph)
    }

    /// Drop the cached graph and build again.
    pub fn rebuild(&mut self) -> Result<Arc<WorldGraph>> {
        self.built = None;
        self.build()
    }

    /// Unlock a built builder for editing without building again.
    pub fn invalidate(&mut self) {
        self.built = None;
    }

    /// Remove every node and connection, release the arena and drop the cached graph.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.keys.clear();
        self.connections.clear();
        self.pool.reset();
        self.plan = None;
        self.built = None;
        self.source_diagram = None;
    }

    pub(crate) fn ensure_mutable(&self, action: &str) -> Result<()> {
        if self.built.is_some() {
            return Err(Error::InvalidState(format!(
                "cannot {action}: graph is already built"
            )));
        }
        Ok(())
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [WorldNode] {
        &mut self.nodes
    }

    pub(crate) fn set_parallel_plan(&mut self, plan: ParallelPlan) {
        self.plan = Some(plan);
    }

    /// Reorder nodes so that `order[i]` becomes node `i`. Connections, keys and
    /// the recorded plan follow their nodes.
    pub(crate) fn apply_order(&mut self, order: &[NodeId]) -> Result<()> {
        let count = self.nodes.len();
        let mut new_index = vec![usize::MAX; count];
        for (position, &old) in order.iter().enumerate() {
            match new_index.get_mut(old) {
                Some(slot) if *slot == usize::MAX => *slot = position,
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "node order is not a permutation of 0..{count}"
                    )))
                }
            }
        }
        if order.len() != count {
            return Err(Error::InvalidArgument(format!(
                "node order has {} entries for {count} nodes",
                order.len()
            )));
        }

        let mut slots: Vec<Option<(WorldNode, NodeKey)>> = self
            .nodes
            .drain(..)
            .zip(self.keys.drain(..))
            .map(Some)
            .collect();
        for &old in order {
            if let Some((node, key)) = slots[old].take() {
                self.nodes.push(node);
                self.keys.push(key);
            }
        }
        for c in &mut self.connections {
            c.source = new_index[c.source];
            c.dest = new_index[c.dest];
        }
        if let Some(plan) = &mut self.plan {
            for group in &mut plan.groups {
                for node in group.iter_mut() {
                    *node = new_index[*node];
                }
            }
            for node in &mut plan.order {
                *node = new_index[*node];
            }
        }
        Ok(())
    }

    fn check_endpoints(
        &self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> Result<()> {
        let count = self.nodes.len();
        if source >= count || dest >= count {
            return Err(Error::InvalidArgument(format!(
                "connection {source} -> {dest} references a node outside 0..{count}"
            )));
        }
        if source == dest {
            return Err(Error::InvalidArgument(format!(
                "node {source} cannot connect to itself"
            )));
        }
        if source_port >= self.nodes[source].outputs().len() {
            return Err(Error::InvalidArgument(format!(
                "node {source} has no output port {source_port}"
            )));
        }
        if dest_port >= self.nodes[dest].inputs().len() {
            return Err(Error::InvalidArgument(format!(
                "node {dest} has no input port {dest_port}"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("built", &self.is_built())
            .field("memory_usage", &self.pool.used())
            .finish()
    }
}
