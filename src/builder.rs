//! Builder for configuring and constructing a `VoicePipeline`.

use crate::world::{
    BlockDiagram, BuilderConfig, ClassificationPolicy, ExecutionConfig, ExecutionContext,
    GraphBuilder, GraphOptimizer, NodeId, NodeType, OptimizationLevel, OptimizationOptions,
    ReferenceVocoder, SharedBackend, VoiceParameters, WorldNode,
};
use crate::{Result, VoicePipeline};
use etude_world::node::{DEFAULT_F0_CEIL, DEFAULT_F0_FLOOR};

/// Without a diagram the pipeline runs the full WORLD chain:
///
/// ```text
/// input -> f0 ------------+-> merge -> utau -> synthesis -> output
///       -> spectrum ------+                 /
///       -> aperiodicity --+----------------
/// ```
///
/// # Example
///
/// ```ignore
/// use etude::prelude::*;
///
/// let pipeline = VoicePipeline::builder()
///     .voice(VoiceParameters { target_pitch: 261.6, ..Default::default() })
///     .optimization_level(OptimizationLevel::Maximum)
///     .build()?;
///
/// let rendered = pipeline.process(&samples, 44_100)?;
/// ```
pub struct VoicePipelineBuilder {
    builder_config: BuilderConfig,
    execution_config: ExecutionConfig,
    optimization: Option<OptimizationOptions>,
    voice: VoiceParameters,
    backend: Option<SharedBackend>,
    diagram: Option<(BlockDiagram, ClassificationPolicy)>,
}

impl Default for VoicePipelineBuilder {
    fn default() -> Self {
        Self {
            builder_config: BuilderConfig::default(),
            execution_config: ExecutionConfig::default(),
            optimization: Some(OptimizationOptions::default()),
            voice: VoiceParameters::default(),
            backend: None,
            diagram: None,
        }
    }
}

impl VoicePipelineBuilder {
    pub fn builder_config(mut self, config: BuilderConfig) -> Self {
        self.builder_config = config;
        self
    }

    pub fn execution_config(mut self, config: ExecutionConfig) -> Self {
        self.execution_config = config;
        self
    }

    pub fn optimization(mut self, options: OptimizationOptions) -> Self {
        self.optimization = Some(options);
        self
    }

    /// Default: [`OptimizationLevel::Aggressive`]
    pub fn optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization = Some(OptimizationOptions::for_level(level));
        self
    }

    pub fn no_optimization(mut self) -> Self {
        self.optimization = None;
        self
    }

    pub fn voice(mut self, voice: VoiceParameters) -> Self {
        self.voice = voice;
        self
    }

    /// Default: [`ReferenceVocoder`]
    pub fn backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the graph from `diagram` instead of the standard chain.
    pub fn diagram(mut self, diagram: BlockDiagram, policy: ClassificationPolicy) -> Self {
        self.diagram = Some((diagram, policy));
        self
    }

    pub fn build(self) -> Result<VoicePipeline> {
        let mut builder = match &self.diagram {
            Some((diagram, policy)) => GraphBuilder::from_diagram_with(diagram, *policy)?,
            None => standard_graph(
                self.builder_config.clone(),
                &self.voice,
                self.execution_config.frame_period,
            )?,
        };

        let optimize = self.builder_config.enable_optimization
            && self.execution_config.enable_optimization
            && self.voice.enable_optimization;
        let stats = match &self.optimization {
            Some(options) if optimize && options.any_enabled() => {
                let report = GraphOptimizer::new(options.clone())?.optimize(&mut builder)?;
                Some(report.stats)
            }
            _ => None,
        };

        let graph = builder.build()?;
        let mut execution_config = self.execution_config;
        execution_config.enable_caching &= self.voice.enable_cache;
        let backend = self.backend.unwrap_or_else(ReferenceVocoder::shared);
        let context = ExecutionContext::with_backend(self.voice, execution_config, backend)?;

        tracing::info!(
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            optimized = stats.is_some(),
            "voice pipeline ready"
        );
        Ok(VoicePipeline::from_parts(graph, context, stats))
    }
}

/// The full analysis/synthesis chain for `voice`.
pub(crate) fn standard_graph(
    config: BuilderConfig,
    voice: &VoiceParameters,
    frame_period: f64,
) -> Result<GraphBuilder> {
    let mut b = GraphBuilder::new(config)?;
    let input = b.add_default_node(NodeType::AudioInput)?;
    let f0 = add(&mut b, |b| {
        WorldNode::f0_extraction(b.pool(), frame_period, DEFAULT_F0_FLOOR, DEFAULT_F0_CEIL)
    })?;
    let spectrum = b.add_default_node(NodeType::SpectrumAnalysis)?;
    let aperiodicity = b.add_default_node(NodeType::AperiodicityAnalysis)?;
    let merge = b.add_default_node(NodeType::ParameterMerge)?;
    let utau = b.add_default_node(NodeType::UtauMapping)?;
    let synthesis = add(&mut b, |b| {
        WorldNode::synthesis(b.pool(), voice.sample_rate, frame_period)
    })?;
    let output = add(&mut b, |b| {
        WorldNode::audio_output(b.pool(), voice.output_path.clone())
    })?;

    for (source, dest, port) in [
        (input, f0, 0),
        (input, spectrum, 0),
        (input, aperiodicity, 0),
        (f0, spectrum, 1),
        (f0, aperiodicity, 1),
        (f0, merge, 0),
        (spectrum, merge, 1),
        (aperiodicity, merge, 2),
        (merge, utau, 0),
        (utau, synthesis, 0),
        (spectrum, synthesis, 1),
        (aperiodicity, synthesis, 2),
        (synthesis, output, 0),
    ] {
        b.connect_nodes(source, 0, dest, port)?;
    }
    Ok(b)
}

fn add(
    builder: &mut GraphBuilder,
    make: impl FnOnce(&GraphBuilder) -> etude_world::Result<WorldNode>,
) -> Result<NodeId> {
    let node = make(builder)?;
    Ok(builder.add_node(node)?)
}
