//! Per-run execution statistics.

use crate::node::{NodeId, NodeType};
use etude_core::compat::{AtomicUsize, Mutex, Ordering};
use etude_core::AtomicSeconds;
use std::fmt;
use std::time::Duration;

/// Statistics of the most recent run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_execution_time: Duration,
    /// Time spent inside F0, spectrum and aperiodicity nodes.
    pub analysis_time: Duration,
    /// Time spent inside synthesis nodes.
    pub synthesis_time: Duration,
    pub memory_usage: usize,
    pub peak_memory_usage: usize,
    pub nodes_executed: usize,
    pub total_nodes: usize,
    /// Analysis nodes skipped because the cached analysis was reused.
    pub cache_hits: usize,
    /// Per-node wall time, recorded only with profiling enabled.
    pub node_times: Vec<(NodeId, Duration)>,
}

impl fmt::Display for ExecutionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Execution statistics:")?;
        writeln!(
            f,
            "  Nodes executed: {}/{}",
            self.nodes_executed, self.total_nodes
        )?;
        writeln!(f, "  Total time: {:.3?}", self.total_execution_time)?;
        writeln!(f, "  Analysis time: {:.3?}", self.analysis_time)?;
        writeln!(f, "  Synthesis time: {:.3?}", self.synthesis_time)?;
        writeln!(f, "  Cache hits: {}", self.cache_hits)?;
        write!(
            f,
            "  Memory: {} bytes (peak {} bytes)",
            self.memory_usage, self.peak_memory_usage
        )
    }
}

/// Lock-free accumulators written by the workers of a run.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    analysis: AtomicSeconds,
    synthesis: AtomicSeconds,
    executed: AtomicUsize,
    cache_hits: AtomicUsize,
    node_times: Mutex<Vec<(NodeId, Duration)>>,
}

impl StatsRecorder {
    pub(crate) fn record(&self, id: NodeId, node_type: NodeType, elapsed: Duration, profile: bool) {
        match node_type {
            t if t.is_analysis() => self.analysis.add(elapsed),
            NodeType::Synthesis => self.synthesis.add(elapsed),
            _ => {}
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        if profile {
            self.node_times.lock().push((id, elapsed));
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nodes_executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// Fold the accumulators into `stats`.
    pub(crate) fn finish(&self, stats: &mut ExecutionStats) {
        stats.analysis_time = Duration::from_secs_f64(self.analysis.get());
        stats.synthesis_time = Duration::from_secs_f64(self.synthesis.get());
        stats.nodes_executed = self.nodes_executed();
        stats.cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let mut times = std::mem::take(&mut *self.node_times.lock());
        times.sort_by_key(|(id, _)| *id);
        stats.node_times = times;
    }
}
