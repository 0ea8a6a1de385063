//! # Etude - WORLD Voice Engine
//!
//! Voice analysis and resynthesis built from modular subsystems.
//!
//! ## Architecture
//!
//! Etude is an umbrella crate that coordinates:
//! - **etude-core** - Runtime kernel (arena pool, work-group scheduler, cancellation, atomics)
//! - **etude-world** - WORLD processing graph (nodes, block diagrams, builder,
//!   optimizer, execution context)
//!
//! ## Quick Start
//!
//! ```ignore
//! use etude::prelude::*;
//!
//! // Standard WORLD chain, optimized at the default level
//! let pipeline = VoicePipeline::builder()
//!     .voice(VoiceParameters { target_pitch: 220.0, ..Default::default() })
//!     .build()?;
//!
//! let rendered = pipeline.process(&samples, 44_100)?;
//! ```
//!
//! Graphs can also be assembled by hand:
//!
//! ```ignore
//! use etude::prelude::*;
//!
//! let mut builder = GraphBuilder::new(BuilderConfig::default())?;
//! let input = builder.add_default_node(NodeType::AudioInput)?;
//! let f0 = builder.add_default_node(NodeType::F0Extraction)?;
//! builder.connect_nodes(input, 0, f0, 0)?;
//! let graph = builder.build()?;
//!
//! let ctx = ExecutionContext::new(VoiceParameters::default())?;
//! ctx.set_input_audio(samples, 44_100)?;
//! ctx.execute(&graph)?;
//! ```

/// Re-export of etude-core for direct access
pub use etude_core as core;

/// Re-export of etude-world for direct access
pub use etude_world as world;

// Lock-free primitives and kernel
pub use etude_core::{
    AtomicFlag, AtomicProgress, AtomicSeconds, CancellationToken, MemoryPool, TaskScheduler,
};

// Processing graph
pub use etude_world::{
    Block, BlockDiagram, BuilderConfig, ClassificationPolicy, Connection, ErrorCode,
    ExecutionConfig, ExecutionContext, ExecutionHandle, ExecutionState, ExecutionStats,
    GraphBuilder, GraphOptimizer, NodeId, NodeKey, NodeType, OptimizationLevel,
    OptimizationOptions, OptimizationStats, VoiceParameters, WorldGraph, WorldNode,
    WorldParameters,
};

mod error;
pub use error::{Error, Result};

mod builder;
mod pipeline;

pub use builder::VoicePipelineBuilder;
pub use pipeline::VoicePipeline;

/// Convenience prelude for common imports
pub mod prelude {
    // Main pipeline
    pub use crate::{VoicePipeline, VoicePipelineBuilder};

    // Graph authoring
    pub use crate::world::{
        Block, BlockDiagram, BuilderConfig, ClassificationPolicy, GraphBuilder, NodeType,
        WorldGraph, WorldNode,
    };

    // Optimization
    pub use crate::world::{GraphOptimizer, OptimizationLevel, OptimizationOptions};

    // Execution
    pub use crate::world::{
        ExecutionConfig, ExecutionContext, ExecutionState, VoiceParameters, WorldParameters,
    };
}
