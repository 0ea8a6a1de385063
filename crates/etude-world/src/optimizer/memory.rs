//! Buffer lifetime analysis and reuse planning.

use crate::builder::GraphBuilder;
use crate::node::{NodeId, NodeType};
use crate::schedule;
use crate::Result;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Estimated working-buffer size of a node type.
pub fn memory_estimate(node_type: NodeType) -> usize {
    match node_type {
        NodeType::SpectrumAnalysis => 2 * MIB,
        NodeType::Synthesis => 3 * MIB,
        NodeType::F0Extraction | NodeType::AperiodicityAnalysis => MIB,
        _ => 512 * KIB,
    }
}

/// Which shared buffer each node's output lives in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReusePlan {
    /// Size of every logical buffer.
    pub buffer_sizes: Vec<usize>,
    /// Buffer index per node id.
    pub assignment: Vec<usize>,
    /// Bytes with one buffer per node.
    pub total_bytes: usize,
    pub bytes_saved: usize,
}

impl MemoryReusePlan {
    pub fn buffer_count(&self) -> usize {
        self.buffer_sizes.len()
    }

    /// Nodes sharing a buffer with at least one other node.
    pub fn reused_nodes(&self) -> usize {
        let mut users = vec![0usize; self.buffer_sizes.len()];
        for &b in &self.assignment {
            users[b] += 1;
        }
        self.assignment.iter().filter(|&&b| users[b] > 1).count()
    }
}

/// Live interval of a node's output, in execution levels.
#[derive(Debug, Clone, Copy)]
struct Lifetime {
    node: NodeId,
    start: usize,
    end: usize,
    size: usize,
}

/// Greedy interval assignment: each output, in order of production, takes
/// the best-fitting buffer whose previous occupant is already dead.
///
/// Lifetimes are measured in [`schedule::level_groups`] levels. Nodes of one
/// level may run at the same time, so a buffer only becomes free for the
/// level after its last reader.
pub fn plan_memory_reuse(builder: &GraphBuilder, alignment: usize) -> Result<MemoryReusePlan> {
    let count = builder.node_count();
    let connections = builder.connections();
    let levels = schedule::level_groups(count, connections)?;
    let mut level_of = vec![0usize; count];
    for (level, nodes) in levels.iter().enumerate() {
        for &node in nodes {
            level_of[node] = level;
        }
    }

    let align = alignment.max(1);
    let mut lifetimes: Vec<Lifetime> = levels
        .iter()
        .flatten()
        .map(|&node| {
            let start = level_of[node];
            let end = connections
                .iter()
                .filter(|c| c.source == node)
                .map(|c| level_of[c.dest])
                .max()
                .unwrap_or(start);
            let size = builder
                .get_node(node)
                .map_or(0, |n| memory_estimate(n.node_type()));
            Lifetime {
                node,
                start,
                end,
                size: size.div_ceil(align) * align,
            }
        })
        .collect();
    lifetimes.sort_by_key(|l| (l.start, l.node));

    let mut plan = MemoryReusePlan {
        assignment: vec![0; count],
        ..Default::default()
    };
    // last level at which each buffer is still read
    let mut busy_until: Vec<usize> = Vec::new();

    for life in &lifetimes {
        plan.total_bytes += life.size;
        let free = (0..plan.buffer_sizes.len()).filter(|&b| busy_until[b] < life.start);
        // prefer the smallest buffer that already fits, else the largest one to grow
        let fitting = free
            .clone()
            .filter(|&b| plan.buffer_sizes[b] >= life.size)
            .min_by_key(|&b| plan.buffer_sizes[b]);
        let chosen = fitting.or_else(|| free.max_by_key(|&b| plan.buffer_sizes[b]));

        let buffer = match chosen {
            Some(b) => {
                plan.buffer_sizes[b] = plan.buffer_sizes[b].max(life.size);
                busy_until[b] = life.end;
                b
            }
            None => {
                plan.buffer_sizes.push(life.size);
                busy_until.push(life.end);
                plan.buffer_sizes.len() - 1
            }
        };
        plan.assignment[life.node] = buffer;
    }

    let allocated: usize = plan.buffer_sizes.iter().sum();
    plan.bytes_saved = plan.total_bytes.saturating_sub(allocated);
    Ok(plan)
}
