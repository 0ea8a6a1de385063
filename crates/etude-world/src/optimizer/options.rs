use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Preset bundles of optimization passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// No passes.
    None,
    /// Passes that never restructure the graph beyond removing dead nodes.
    Basic,
    /// Every pass.
    #[default]
    Aggressive,
    /// Every pass, with the thread hint raised to the machine's parallelism.
    Maximum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationOptions {
    pub level: OptimizationLevel,
    pub enable_node_fusion: bool,
    pub enable_memory_reuse: bool,
    pub enable_simd_optimization: bool,
    pub enable_parallel_execution: bool,
    pub enable_cache_optimization: bool,
    pub enable_dead_code_elimination: bool,
    /// Widest parallel group the planner emits.
    pub max_thread_count: usize,
    /// Buffer sizes in the memory reuse plan are rounded up to this.
    pub memory_alignment: usize,
    /// Pairs whose fusion benefit exceeds this are fused.
    pub fusion_threshold: f32,
    /// Advisory; recorded for SIMD-capable backends.
    pub prefer_wide_simd: bool,
}

pub(crate) const DEFAULT_MAX_THREADS: usize = 8;
pub(crate) const DEFAULT_MEMORY_ALIGNMENT: usize = 32;
pub(crate) const DEFAULT_FUSION_THRESHOLD: f32 = 0.5;

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self::for_level(OptimizationLevel::Aggressive)
    }
}

impl OptimizationOptions {
    pub fn for_level(level: OptimizationLevel) -> Self {
        let (structural, basic) = match level {
            OptimizationLevel::None => (false, false),
            OptimizationLevel::Basic => (false, true),
            OptimizationLevel::Aggressive | OptimizationLevel::Maximum => (true, true),
        };
        let max_thread_count = if level == OptimizationLevel::Maximum {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_MAX_THREADS)
                .max(DEFAULT_MAX_THREADS)
        } else {
            DEFAULT_MAX_THREADS
        };
        Self {
            level,
            enable_node_fusion: structural,
            enable_memory_reuse: basic,
            enable_simd_optimization: basic,
            enable_parallel_execution: basic,
            enable_cache_optimization: structural,
            enable_dead_code_elimination: basic,
            max_thread_count,
            memory_alignment: DEFAULT_MEMORY_ALIGNMENT,
            fusion_threshold: DEFAULT_FUSION_THRESHOLD,
            prefer_wide_simd: level == OptimizationLevel::Maximum,
        }
    }

    /// Whether at least one pass is enabled.
    pub fn any_enabled(&self) -> bool {
        self.enable_node_fusion
            || self.enable_memory_reuse
            || self.enable_simd_optimization
            || self.enable_parallel_execution
            || self.enable_cache_optimization
            || self.enable_dead_code_elimination
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_thread_count == 0 {
            return Err(Error::InvalidArgument(
                "max_thread_count must be at least 1".into(),
            ));
        }
        if !self.memory_alignment.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "memory_alignment {} is not a power of two",
                self.memory_alignment
            )));
        }
        if !(0.0..=1.0).contains(&self.fusion_threshold) {
            return Err(Error::InvalidArgument(format!(
                "fusion_threshold {} outside 0..=1",
                self.fusion_threshold
            )));
        }
        Ok(())
    }
}
