//! Dead-node elimination.

use crate::builder::{GraphBuilder, NodeKey};
use crate::node::NodeType;
use crate::schedule;
use crate::Result;

/// Remove every node that neither depends on an audio input nor feeds an
/// audio output. Graphs without either root are left alone.
///
/// Returns the number of nodes removed.
pub fn eliminate_dead_nodes(builder: &mut GraphBuilder) -> Result<usize> {
    builder.ensure_mutable("eliminate dead nodes")?;
    let count = builder.node_count();
    let of_type = |t: NodeType| -> Vec<usize> {
        builder
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| n.node_type() == t)
            .map(|(i, _)| i)
            .collect()
    };
    let inputs = of_type(NodeType::AudioInput);
    let outputs = of_type(NodeType::AudioOutput);
    if inputs.is_empty() && outputs.is_empty() {
        tracing::debug!("no audio input or output, skipping dead-node elimination");
        return Ok(0);
    }

    let downstream = schedule::reachable_forward(count, builder.connections(), inputs);
    let upstream = schedule::reachable_backward(count, builder.connections(), outputs);
    let dead: Vec<NodeKey> = (0..count)
        .filter(|&i| !downstream[i] && !upstream[i])
        .filter_map(|i| builder.key_of(i))
        .collect();

    for key in &dead {
        if let Some(id) = builder.index_of(*key) {
            let node = builder.remove_node(id)?;
            tracing::debug!(node = node.name(), "removed unreachable node");
        }
    }
    Ok(dead.len())
}
