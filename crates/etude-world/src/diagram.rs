//! Block diagrams: the authoring format the graph builder converts from.
//!
//! A diagram is a flat list of named [`Block`]s and the connections between
//! their ports. Blocks carry numeric parameters and, optionally, an explicit
//! [`NodeType`]; without one the builder infers the type from the block name.

use crate::connection::{Connection, DEFAULT_BUFFER_SIZE};
use crate::node::NodeType;
use crate::port;
use crate::schedule;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Diagram-scoped block identifier. The first block gets id 1.
pub type BlockId = u32;

/// Diagram-scoped connection identifier. The first connection gets id 1.
pub type ConnectionId = u32;

/// Named numeric parameters of a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockParams {
    values: BTreeMap<String, f64>,
}

impl BlockParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    pub fn remove(&mut self, key: &str) -> Option<f64> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    name: String,
    node_type: Option<NodeType>,
    input_ports: usize,
    output_ports: usize,
    enabled: bool,
    params: BlockParams,
}

impl Block {
    /// Untyped block with the given port counts.
    pub fn new(name: impl Into<String>, input_ports: usize, output_ports: usize) -> Self {
        Self {
            id: 0,
            name: name.into(),
            node_type: None,
            input_ports,
            output_ports,
            enabled: true,
            params: BlockParams::default(),
        }
    }

    /// Block with an explicit node type and that type's port layout.
    pub fn typed(name: impl Into<String>, node_type: NodeType) -> Self {
        let (inputs, outputs) = port::layout(node_type, 0, 0);
        let mut block = Self::new(name, inputs.len(), outputs.len());
        block.node_type = Some(node_type);
        block
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.set(key, value);
        self
    }

    /// Zero until the block is added to a diagram.
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> Option<NodeType> {
        self.node_type
    }

    pub fn input_ports(&self) -> usize {
        self.input_ports
    }

    pub fn output_ports(&self) -> usize {
        self.output_ports
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn params(&self) -> &BlockParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut BlockParams {
        &mut self.params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagramConnection {
    pub id: ConnectionId,
    pub source_block: BlockId,
    pub source_port: usize,
    pub dest_block: BlockId,
    pub dest_port: usize,
    pub buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct BlockDiagram {
    name: String,
    blocks: Vec<Block>,
    connections: Vec<DiagramConnection>,
    max_blocks: usize,
    max_connections: usize,
    next_block_id: BlockId,
    next_connection_id: ConnectionId,
}

impl BlockDiagram {
    pub fn new(name: impl Into<String>, max_blocks: usize, max_connections: usize) -> Result<Self> {
        if max_blocks == 0 || max_connections == 0 {
            return Err(Error::InvalidArgument(
                "diagram capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            blocks: Vec::with_capacity(max_blocks),
            connections: Vec::with_capacity(max_connections),
            max_blocks,
            max_connections,
            next_block_id: 1,
            next_connection_id: 1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn connections(&self) -> &[DiagramConnection] {
        &self.connections
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Add `block` and return the id assigned to it.
    pub fn add_block(&mut self, mut block: Block) -> Result<BlockId> {
        if self.blocks.len() >= self.max_blocks {
            return Err(Error::OutOfMemory {
                requested: self.blocks.len() + 1,
                available: self.max_blocks,
            });
        }
        block.id = self.next_block_id;
        self.next_block_id += 1;
        let id = block.id;
        self.blocks.push(block);
        Ok(id)
    }

    pub fn add_typed_block(
        &mut self,
        name: impl Into<String>,
        node_type: NodeType,
    ) -> Result<BlockId> {
        self.add_block(Block::typed(name, node_type))
    }

    /// Remove a block together with every connection touching it.
    pub fn remove_block(&mut self, id: BlockId) -> Result<Block> {
        let index = self
            .position_of(id)
            .ok_or_else(|| Error::NotFound(format!("block {id}")))?;
        self.connections
            .retain(|c| c.source_block != id && c.dest_block != id);
        Ok(self.blocks.remove(index))
    }

    pub fn find_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn find_block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn find_block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn connect(
        &mut self,
        source_block: BlockId,
        source_port: usize,
        dest_block: BlockId,
        dest_port: usize,
    ) -> Result<ConnectionId> {
        self.connect_with_buffer(
            source_block,
            source_port,
            dest_block,
            dest_port,
            DEFAULT_BUFFER_SIZE,
        )
    }

    pub fn connect_with_buffer(
        &mut self,
        source_block: BlockId,
        source_port: usize,
        dest_block: BlockId,
        dest_port: usize,
        buffer_size: usize,
    ) -> Result<ConnectionId> {
        let source = self
            .find_block(source_block)
            .ok_or_else(|| Error::NotFound(format!("source block {source_block}")))?;
        let dest = self
            .find_block(dest_block)
            .ok_or_else(|| Error::NotFound(format!("destination block {dest_block}")))?;
        if source_port >= source.output_ports || dest_port >= dest.input_ports {
            return Err(Error::InvalidArgument(format!(
                "port {source_block}:{source_port} -> {dest_block}:{dest_port} out of range"
            )));
        }
        if buffer_size == 0 {
            return Err(Error::InvalidArgument("buffer_size must be non-zero".into()));
        }
        if let Some(taken) = self
            .connections
            .iter()
            .find(|c| c.dest_block == dest_block && c.dest_port == dest_port)
        {
            return Err(Error::AlreadyExists(
                Connection::new(
                    taken.source_block as usize,
                    taken.source_port,
                    taken.dest_block as usize,
                    taken.dest_port,
                )
                .with_buffer_size(taken.buffer_size),
            ));
        }
        if self.connections.len() >= self.max_connections {
            return Err(Error::OutOfMemory {
                requested: self.connections.len() + 1,
                available: self.max_connections,
            });
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.push(DiagramConnection {
            id,
            source_block,
            source_port,
            dest_block,
            dest_port,
            buffer_size,
        });
        Ok(id)
    }

    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Result<DiagramConnection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or_else(|| Error::NotFound(format!("connection {connection_id}")))?;
        Ok(self.connections.remove(index))
    }

    /// Check that the diagram is acyclic.
    pub fn validate(&self) -> Result<()> {
        let dense = self.dense_connections();
        match schedule::find_cycle(self.blocks.len(), &dense) {
            Some(index) => {
                tracing::warn!(
                    diagram = %self.name,
                    block = self.blocks[index].id,
                    "diagram has a cycle"
                );
                Err(crate::ValidationError::Cycle { node: index }.into())
            }
            None => Ok(()),
        }
    }

    /// Block ids in an order where every block follows its sources.
    pub fn execution_order(&self) -> Result<Vec<BlockId>> {
        let order = schedule::topological_sort(self.blocks.len(), &self.dense_connections())?;
        Ok(order.into_iter().map(|i| self.blocks[i].id).collect())
    }

    /// Index of block `id` in diagram order.
    pub(crate) fn position_of(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// Connections with block ids replaced by positions in diagram order.
    fn dense_connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .filter_map(|c| {
                let source = self.position_of(c.source_block)?;
                let dest = self.position_of(c.dest_block)?;
                Some(
                    Connection::new(source, c.source_port, dest, c.dest_port)
                        .with_buffer_size(c.buffer_size),
                )
            })
            .collect()
    }
}
