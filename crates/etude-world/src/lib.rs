//! WORLD vocoder processing graph.
//!
//! # Primary API
//!
//! - [`BlockDiagram`]: authoring format of named blocks and port connections
//! - [`GraphBuilder`]: capacity-bounded, validating graph construction
//! - [`GraphOptimizer`]: fusion, memory reuse, SIMD tagging, parallel planning,
//!   cache-locality reordering and dead-node elimination
//! - [`WorldGraph`]: built, immutable graph with its execution schedule
//! - [`ExecutionContext`]: stateful, pausable, cancellable execution with
//!   progress reporting and statistics
//!
//! # Example
//!
//! ```ignore
//! use etude_world::{BuilderConfig, ExecutionContext, GraphBuilder, GraphOptimizer, NodeType};
//!
//! let mut builder = GraphBuilder::new(BuilderConfig::default())?;
//! let input = builder.add_default_node(NodeType::AudioInput)?;
//! let f0 = builder.add_default_node(NodeType::F0Extraction)?;
//! let spectrum = builder.add_default_node(NodeType::SpectrumAnalysis)?;
//! let synth = builder.add_default_node(NodeType::Synthesis)?;
//! let output = builder.add_default_node(NodeType::AudioOutput)?;
//! builder.connect_nodes(input, 0, f0, 0)?;
//! builder.connect_nodes(input, 0, spectrum, 0)?;
//! builder.connect_nodes(f0, 0, synth, 0)?;
//! builder.connect_nodes(spectrum, 0, synth, 1)?;
//! builder.connect_nodes(synth, 0, output, 0)?;
//!
//! GraphOptimizer::default().optimize(&mut builder)?;
//! let graph = builder.build()?;
//!
//! let ctx = ExecutionContext::new(Default::default())?;
//! ctx.set_input_audio(samples, 44_100)?;
//! ctx.execute(&graph)?;
//! ```

pub mod error;
pub use error::{Error, ErrorCode, Result, ValidationError};

mod config;
pub use config::{BuilderConfig, ExecutionConfig};

mod params;
pub use params::{VoiceParameters, WorldParameters};

pub mod port;
pub use port::{Port, PortDirection, PortType};

mod connection;
pub use connection::{Connection, DEFAULT_BUFFER_SIZE};

pub mod vocoder;
pub use vocoder::{ReferenceVocoder, SharedBackend, VocoderBackend};

pub mod node;
pub use node::{AnalysisSettings, NodeId, NodeKind, NodeProcessor, NodeType, WorldNode};

pub mod diagram;
pub use diagram::{Block, BlockDiagram, BlockId, BlockParams, ConnectionId, DiagramConnection};

pub mod schedule;

mod builder;
pub use builder::{classify_block, ClassificationPolicy, GraphBuilder, NodeKey};

mod graph;
pub use graph::WorldGraph;

pub mod optimizer;
pub use optimizer::{
    GraphOptimizer, OptimizationLevel, OptimizationOptions, OptimizationReport,
    OptimizationStats, ParallelPlan,
};

pub mod context;
pub use context::{
    AudioBuffer, CompletionCallback, ExecutionContext, ExecutionHandle, ExecutionState,
    ExecutionStats, ProcessContext, ProgressCallback, SharedData,
};
