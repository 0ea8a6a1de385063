//! Node fusion.

use crate::builder::{GraphBuilder, NodeKey};
use crate::node::{NodeId, NodeType};
use crate::schedule;
use crate::{Error, Result};

/// A fusion the pass applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionInfo {
    pub fused_type: NodeType,
    pub benefit: f32,
    /// Names of the two original nodes.
    pub originals: (String, String),
    /// Key of the replacement node.
    pub fused: NodeKey,
}

/// Whether two node types may be fused at all.
pub fn can_fuse(a: NodeType, b: NodeType) -> bool {
    a == b && !a.is_root()
}

/// Benefit score of fusing a node of type `a` with one of type `b`.
///
/// Matching types score 0.3, plus 0.2 for the shared access pattern, plus
/// 0.4 for the analysis stages that share a frame loop (F0 and spectrum).
pub fn fusion_benefit(a: NodeType, b: NodeType) -> f32 {
    if !can_fuse(a, b) {
        return 0.0;
    }
    let mut benefit = 0.3 + 0.2;
    if matches!(a, NodeType::F0Extraction | NodeType::SpectrumAnalysis) {
        benefit += 0.4;
    }
    benefit
}

/// Repeatedly fuse the first qualifying pair until none is left.
pub fn fuse_nodes(builder: &mut GraphBuilder, threshold: f32) -> Result<Vec<FusionInfo>> {
    builder.ensure_mutable("fuse nodes")?;
    let mut applied = Vec::new();
    while let Some((a, b, benefit)) = next_pair(builder, threshold) {
        applied.push(fuse_pair(builder, a, b, benefit)?);
    }
    Ok(applied)
}

fn next_pair(builder: &GraphBuilder, threshold: f32) -> Option<(NodeId, NodeId, f32)> {
    let nodes = builder.nodes();
    let count = nodes.len();
    for i in 0..count {
        for j in i + 1..count {
            let benefit = fusion_benefit(nodes[i].node_type(), nodes[j].node_type());
            if benefit <= threshold {
                continue;
            }
            // a path between the two would turn into a cycle through the fused node
            let from_i = schedule::reachable_forward(count, builder.connections(), [i]);
            let from_j = schedule::reachable_forward(count, builder.connections(), [j]);
            if from_i[j] || from_j[i] {
                continue;
            }
            return Some((i, j, benefit));
        }
    }
    None
}

/// Endpoint of a connection that is being rewired.
#[derive(Clone, Copy, PartialEq)]
enum End {
    Fused,
    Other(NodeKey),
}

fn fuse_pair(builder: &mut GraphBuilder, a: NodeId, b: NodeId, benefit: f32) -> Result<FusionInfo> {
    let first = builder
        .get_node(a)
        .ok_or_else(|| Error::NotFound(format!("node {a}")))?;
    let second = builder
        .get_node(b)
        .ok_or_else(|| Error::NotFound(format!("node {b}")))?;
    let fused_node = first.fuse(second, builder.pool())?;
    let originals = (first.name().to_string(), second.name().to_string());
    let fused_type = fused_node.node_type();

    let end_of = |builder: &GraphBuilder, id: NodeId| -> Result<End> {
        if id == a || id == b {
            return Ok(End::Fused);
        }
        builder
            .key_of(id)
            .map(End::Other)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))
    };
    let mut rewired = Vec::new();
    for c in builder.connections() {
        if c.touches(a) || c.touches(b) {
            rewired.push((
                end_of(builder, c.source)?,
                c.source_port,
                end_of(builder, c.dest)?,
                c.dest_port,
                c.buffer_size,
            ));
        }
    }

    // highest id first so the swap-remove of `b` cannot move `a`
    builder.remove_node(b)?;
    builder.remove_node(a)?;
    let fused_id = builder.add_node(fused_node)?;
    let fused = builder
        .key_of(fused_id)
        .ok_or_else(|| Error::NotFound(format!("node {fused_id}")))?;

    let resolve = |builder: &GraphBuilder, end: End| -> Option<NodeId> {
        match end {
            End::Fused => Some(fused_id),
            End::Other(key) => builder.index_of(key),
        }
    };
    for (source, source_port, dest, dest_port, buffer_size) in rewired {
        if source == End::Fused && dest == End::Fused {
            continue;
        }
        let (Some(src), Some(dst)) = (resolve(builder, source), resolve(builder, dest)) else {
            continue;
        };
        if builder.has_connection(src, source_port, dst, dest_port) {
            continue;
        }
        match builder.connect_nodes_with_buffer(src, source_port, dst, dest_port, buffer_size) {
            Ok(()) => {}
            Err(e @ (Error::AlreadyExists(_) | Error::InvalidArgument(_))) => {
                tracing::warn!(
                    src,
                    source_port,
                    dst,
                    dest_port,
                    error = %e,
                    "dropping connection that conflicts after fusion"
                );
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(
        first = %originals.0,
        second = %originals.1,
        node_type = %fused_type,
        benefit,
        "fused nodes"
    );
    Ok(FusionInfo {
        fused_type,
        benefit,
        originals,
        fused,
    })
}
