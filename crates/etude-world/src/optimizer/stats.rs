use std::fmt;
use std::time::Duration;

/// What one `optimize` run changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationStats {
    pub nodes_fused: usize,
    pub memory_allocations_reduced: usize,
    /// Bytes the memory reuse plan saves over one buffer per node.
    pub memory_saved: usize,
    pub simd_operations_added: usize,
    /// Groups in the parallel plan.
    pub parallel_sections_created: usize,
    pub dead_nodes_removed: usize,
    pub optimization_time: Duration,
    /// Estimated from the plan, not measured.
    pub estimated_speedup: f64,
}

impl OptimizationStats {
    /// Speedup estimate from fusion count, SIMD coverage and average group width.
    pub(crate) fn estimate_speedup(&mut self, node_count: usize, max_threads: usize) {
        let fusion = 1.0 + 0.1 * self.nodes_fused as f64;
        let simd = if node_count > 0 {
            1.0 + 0.25 * self.simd_operations_added as f64 / node_count as f64
        } else {
            1.0
        };
        let parallel = if self.parallel_sections_created > 0 {
            (node_count as f64 / self.parallel_sections_created as f64)
                .clamp(1.0, max_threads.max(1) as f64)
        } else {
            1.0
        };
        self.estimated_speedup = fusion * simd * parallel;
    }
}

impl fmt::Display for OptimizationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Graph Optimization Statistics ===")?;
        writeln!(f, "Nodes fused: {}", self.nodes_fused)?;
        writeln!(f, "Memory allocations reduced: {}", self.memory_allocations_reduced)?;
        writeln!(f, "Memory saved: {} bytes", self.memory_saved)?;
        writeln!(f, "SIMD operations added: {}", self.simd_operations_added)?;
        writeln!(f, "Parallel sections created: {}", self.parallel_sections_created)?;
        writeln!(f, "Dead nodes removed: {}", self.dead_nodes_removed)?;
        writeln!(
            f,
            "Optimization time: {:.3} seconds",
            self.optimization_time.as_secs_f64()
        )?;
        write!(f, "Estimated speedup: {:.2}x", self.estimated_speedup)
    }
}
