//! Ordering analysis over a node/connection set.
//!
//! Everything here works on dense node indices `0..node_count` and the
//! connection list, so the same routines serve the diagram, the builder,
//! the optimizer passes and the built graph.

use crate::connection::Connection;
use crate::error::ValidationError;
use crate::node::NodeId;
use crate::Result;
use etude_core::compat::HashSet;
use std::collections::VecDeque;

/// Ordered groups of nodes that may run concurrently, plus the flattened order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelPlan {
    pub groups: Vec<Vec<NodeId>>,
    pub order: Vec<NodeId>,
}

impl ParallelPlan {
    /// Build a plan from level groups.
    pub fn from_groups(groups: Vec<Vec<NodeId>>) -> Self {
        let order = groups.iter().flatten().copied().collect();
        Self { groups, order }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Size of the widest group.
    pub fn max_width(&self) -> usize {
        self.groups.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Groups holding more than one node.
    pub fn parallel_sections(&self) -> usize {
        self.groups.iter().filter(|g| g.len() > 1).count()
    }

    /// Check that every node appears exactly once and every connection
    /// points from an earlier group into a strictly later one.
    pub fn is_valid(&self, node_count: usize, connections: &[Connection]) -> bool {
        let mut group_of = vec![usize::MAX; node_count];
        for (index, group) in self.groups.iter().enumerate() {
            for &node in group {
                match group_of.get_mut(node) {
                    Some(slot) if *slot == usize::MAX => *slot = index,
                    _ => return false,
                }
            }
        }
        if group_of.iter().any(|&g| g == usize::MAX) {
            return false;
        }
        connections.iter().all(|c| {
            matches!(
                (group_of.get(c.source), group_of.get(c.dest)),
                (Some(src), Some(dst)) if src < dst
            )
        })
    }
}

/// Successor lists, one unique entry per `src -> dst` pair.
fn successors(node_count: usize, connections: &[Connection]) -> Vec<Vec<NodeId>> {
    let mut out = vec![Vec::new(); node_count];
    let mut seen = HashSet::with_capacity(connections.len());
    for c in connections {
        if c.source < node_count && c.dest < node_count && seen.insert((c.source, c.dest)) {
            out[c.source].push(c.dest);
        }
    }
    out
}

/// Predecessor set of every node, sorted.
pub fn analyze_dependencies(node_count: usize, connections: &[Connection]) -> Vec<Vec<NodeId>> {
    let mut preds = vec![Vec::new(); node_count];
    for c in connections {
        if c.source < node_count && c.dest < node_count {
            preds[c.dest].push(c.source);
        }
    }
    for list in &mut preds {
        list.sort_unstable();
        list.dedup();
    }
    preds
}

/// First node found on a cycle, by depth-first search.
pub fn find_cycle(node_count: usize, connections: &[Connection]) -> Option<NodeId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let succ = successors(node_count, connections);
    let mut marks = vec![Mark::Unvisited; node_count];

    for root in 0..node_count {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: (node, next successor index)
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::OnStack;
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&child) = succ[node].get(*next) {
                *next += 1;
                match marks[child] {
                    Mark::OnStack => return Some(child),
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}

/// Topological order by Kahn's algorithm, lowest index first among ready nodes.
pub fn topological_sort(node_count: usize, connections: &[Connection]) -> Result<Vec<NodeId>> {
    let groups = level_groups(node_count, connections)?;
    Ok(groups.into_iter().flatten().collect())
}

/// Kahn levels: group `k` holds the nodes whose longest path from a source is `k`.
///
/// Nodes of one level have no connection between them.
pub fn level_groups(node_count: usize, connections: &[Connection]) -> Result<Vec<Vec<NodeId>>> {
    let succ = successors(node_count, connections);
    let mut in_degree = vec![0usize; node_count];
    for targets in &succ {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut current: Vec<NodeId> = (0..node_count).filter(|&n| in_degree[n] == 0).collect();
    let mut groups = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &node in &current {
            for &t in &succ[node] {
                in_degree[t] -= 1;
                if in_degree[t] == 0 {
                    next.push(t);
                }
            }
        }
        next.sort_unstable();
        groups.push(std::mem::replace(&mut current, next));
    }

    if placed < node_count {
        let node = find_cycle(node_count, connections)
            .or_else(|| in_degree.iter().position(|&d| d > 0))
            .unwrap_or_default();
        return Err(ValidationError::Cycle { node }.into());
    }
    Ok(groups)
}

/// Nodes reachable from `roots` by following connections forward.
pub(crate) fn reachable_forward(
    node_count: usize,
    connections: &[Connection],
    roots: impl IntoIterator<Item = NodeId>,
) -> Vec<bool> {
    let succ = successors(node_count, connections);
    flood(node_count, &succ, roots)
}

/// Nodes that can reach one of `roots`.
pub(crate) fn reachable_backward(
    node_count: usize,
    connections: &[Connection],
    roots: impl IntoIterator<Item = NodeId>,
) -> Vec<bool> {
    let reversed: Vec<Connection> = connections
        .iter()
        .map(|c| Connection::new(c.dest, c.dest_port, c.source, c.source_port))
        .collect();
    let pred = successors(node_count, &reversed);
    flood(node_count, &pred, roots)
}

fn flood(
    node_count: usize,
    edges: &[Vec<NodeId>],
    roots: impl IntoIterator<Item = NodeId>,
) -> Vec<bool> {
    let mut seen = vec![false; node_count];
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for root in roots {
        if root < node_count && !seen[root] {
            seen[root] = true;
            queue.push_back(root);
        }
    }
    while let Some(node) = queue.pop_front() {
        for &next in &edges[node] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}

/// Whether the graph, with edge directions ignored, is one component.
///
/// Returns the first node outside the component of node 0.
pub(crate) fn first_disconnected(node_count: usize, connections: &[Connection]) -> Option<NodeId> {
    if node_count == 0 {
        return None;
    }
    let mut undirected = vec![Vec::new(); node_count];
    for c in connections {
        if c.source < node_count && c.dest < node_count {
            undirected[c.source].push(c.dest);
            undirected[c.dest].push(c.source);
        }
    }
    let seen = flood(node_count, &undirected, [0]);
    seen.iter().position(|&s| !s)
}
