//! Graph-level optimization passes.
//!
//! Passes run against an unbuilt [`GraphBuilder`] in a fixed order:
//!
//! 1. node fusion
//! 2. memory reuse planning
//! 3. SIMD tagging
//! 4. parallel planning
//! 5. cache-locality reordering
//! 6. dead-node elimination
//!
//! Each pass can be switched off in [`OptimizationOptions`]. The first failing
//! pass stops the run; passes that already ran keep their changes.

mod dead_nodes;
mod fusion;
mod locality;
mod memory;
mod options;
mod parallel;
mod stats;

pub use dead_nodes::eliminate_dead_nodes;
pub use fusion::{can_fuse, fuse_nodes, fusion_benefit, FusionInfo};
pub use locality::{locality_order, optimize_cache_locality};
pub use memory::{memory_estimate, plan_memory_reuse, MemoryReusePlan};
pub use options::{OptimizationLevel, OptimizationOptions};
pub use parallel::plan_parallel_execution;
pub use stats::OptimizationStats;

pub use crate::schedule::{analyze_dependencies, topological_sort, ParallelPlan};

use crate::builder::GraphBuilder;
use crate::node::NodeType;
use crate::Result;
use std::time::Instant;

/// Everything an [`GraphOptimizer::optimize`] run produced.
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    pub stats: OptimizationStats,
    pub fusions: Vec<FusionInfo>,
    pub memory_plan: Option<MemoryReusePlan>,
    pub parallel_plan: Option<ParallelPlan>,
}

/// Node types with vectorizable inner loops.
pub fn is_simd_candidate(node_type: NodeType) -> bool {
    matches!(
        node_type,
        NodeType::F0Extraction
            | NodeType::SpectrumAnalysis
            | NodeType::AperiodicityAnalysis
            | NodeType::Synthesis
    )
}

/// Flag SIMD-capable nodes. Returns how many nodes were newly flagged.
pub fn tag_simd(builder: &mut GraphBuilder) -> Result<usize> {
    builder.ensure_mutable("tag SIMD nodes")?;
    let mut tagged = 0;
    for node in builder.nodes_mut() {
        if is_simd_candidate(node.node_type()) && !node.is_simd_eligible() {
            node.set_simd_eligible(true);
            tagged += 1;
        }
    }
    Ok(tagged)
}

#[derive(Debug, Clone, Default)]
pub struct GraphOptimizer {
    options: OptimizationOptions,
}

impl GraphOptimizer {
    pub fn new(options: OptimizationOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn with_level(level: OptimizationLevel) -> Self {
        Self {
            options: OptimizationOptions::for_level(level),
        }
    }

    pub fn options(&self) -> &OptimizationOptions {
        &self.options
    }

    /// Run the enabled passes over `builder` in order.
    pub fn optimize(&self, builder: &mut GraphBuilder) -> Result<OptimizationReport> {
        builder.ensure_mutable("optimize")?;
        let started = Instant::now();
        let options = &self.options;
        let mut report = OptimizationReport::default();

        if options.enable_node_fusion {
            report.fusions = fuse_nodes(builder, options.fusion_threshold)?;
            report.stats.nodes_fused = report.fusions.len();
            tracing::debug!(fused = report.stats.nodes_fused, "node fusion");
        }

        if options.enable_memory_reuse {
            let plan = plan_memory_reuse(builder, options.memory_alignment)?;
            report.stats.memory_saved = plan.bytes_saved;
            report.stats.memory_allocations_reduced =
                builder.node_count().saturating_sub(plan.buffer_count());
            tracing::debug!(
                buffers = plan.buffer_count(),
                saved = plan.bytes_saved,
                "memory reuse planning"
            );
            report.memory_plan = Some(plan);
        }

        if options.enable_simd_optimization {
            report.stats.simd_operations_added = tag_simd(builder)?;
            tracing::debug!(tagged = report.stats.simd_operations_added, "SIMD tagging");
        }

        if options.enable_parallel_execution {
            let plan = plan_parallel_execution(builder, options.max_thread_count)?;
            report.stats.parallel_sections_created = plan.group_count();
            tracing::debug!(
                groups = plan.group_count(),
                widest = plan.max_width(),
                "parallel planning"
            );
            builder.set_parallel_plan(plan.clone());
            report.parallel_plan = Some(plan);
        }

        if options.enable_cache_optimization {
            let moved = optimize_cache_locality(builder)?;
            tracing::debug!(moved, "cache-locality reordering");
            // the recorded plan follows the reorder inside the builder
            if moved {
                report.parallel_plan = builder.parallel_plan().cloned();
            }
        }

        if options.enable_dead_code_elimination {
            report.stats.dead_nodes_removed = eliminate_dead_nodes(builder)?;
            tracing::debug!(removed = report.stats.dead_nodes_removed, "dead-node elimination");
            if report.stats.dead_nodes_removed > 0 && options.enable_parallel_execution {
                let plan = plan_parallel_execution(builder, options.max_thread_count)?;
                report.stats.parallel_sections_created = plan.group_count();
                builder.set_parallel_plan(plan.clone());
                report.parallel_plan = Some(plan);
            }
        }

        report.stats.optimization_time = started.elapsed();
        report
            .stats
            .estimate_speedup(builder.node_count(), options.max_thread_count);
        tracing::info!(
            nodes_fused = report.stats.nodes_fused,
            memory_saved = report.stats.memory_saved,
            simd = report.stats.simd_operations_added,
            groups = report.stats.parallel_sections_created,
            speedup = report.stats.estimated_speedup,
            "graph optimized"
        );
        Ok(report)
    }
}
