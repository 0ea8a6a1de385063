//! Cache-locality reordering.

use crate::builder::GraphBuilder;
use crate::node::NodeId;
use crate::schedule;
use crate::Result;

/// Topological order that places each consumer right after its producer
/// whenever the producer was the last node emitted.
pub fn locality_order(builder: &GraphBuilder) -> Result<Vec<NodeId>> {
    let count = builder.node_count();
    let connections = builder.connections();
    // fails on a cycle
    schedule::topological_sort(count, connections)?;

    let preds = schedule::analyze_dependencies(count, connections);
    let mut remaining: Vec<usize> = preds.iter().map(Vec::len).collect();
    let mut succ = vec![Vec::new(); count];
    for (node, list) in preds.iter().enumerate() {
        for &p in list {
            succ[p].push(node);
        }
    }

    let mut ready: Vec<NodeId> = (0..count).filter(|&n| remaining[n] == 0).collect();
    let mut order = Vec::with_capacity(count);
    let mut last: Option<NodeId> = None;

    while !ready.is_empty() {
        let pick = last
            .and_then(|l| {
                ready
                    .iter()
                    .enumerate()
                    .filter(|(_, &n)| succ[l].contains(&n))
                    .min_by_key(|(_, &n)| n)
                    .map(|(i, _)| i)
            })
            .or_else(|| {
                ready
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, &n)| n)
                    .map(|(i, _)| i)
            });
        let Some(index) = pick else { break };
        let node = ready.swap_remove(index);
        order.push(node);
        last = Some(node);
        for &next in &succ[node] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.push(next);
            }
        }
    }
    Ok(order)
}

/// Renumber the builder's nodes in [`locality_order`]. Returns whether anything moved.
pub fn optimize_cache_locality(builder: &mut GraphBuilder) -> Result<bool> {
    builder.ensure_mutable("reorder nodes")?;
    let order = locality_order(builder)?;
    if order.iter().enumerate().all(|(i, &n)| i == n) {
        return Ok(false);
    }
    builder.apply_order(&order)?;
    Ok(true)
}
