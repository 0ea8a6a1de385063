//! Processing graph nodes.
//!
//! A [`WorldNode`] is one typed unit of work: a closed [`NodeKind`] carrying
//! the per-type payload, its input/output [`Port`]s, and the lifecycle
//! `initialize -> execute* -> cleanup`. Nodes are created against a
//! [`MemoryPool`]; the node and its payload are charged to the pool as one
//! reservation, so a constructor either fully succeeds or leaves the pool
//! untouched.

mod payload;

pub use payload::{
    AperiodicityNode, AudioInputNode, AudioOutputNode, CustomNode, F0Node, MergeNode,
    NodeProcessor, SpectrumNode, SynthesisNode, UtauMappingNode,
};

use crate::context::ProcessContext;
use crate::diagram::BlockParams;
use crate::port::{self, Port, PortType};
use crate::vocoder::{F0Settings, SharedBackend};
use crate::{Error, Result};
use etude_core::MemoryPool;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Dense node index inside a builder or built graph.
pub type NodeId = usize;

pub const DEFAULT_FRAME_PERIOD: f64 = 5.0;
pub const DEFAULT_F0_FLOOR: f64 = 71.0;
pub const DEFAULT_F0_CEIL: f64 = 800.0;
pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_Q1: f64 = -0.15;
pub const DEFAULT_AP_THRESHOLD: f64 = 0.85;
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    AudioInput,
    F0Extraction,
    SpectrumAnalysis,
    AperiodicityAnalysis,
    ParameterMerge,
    UtauMapping,
    Synthesis,
    AudioOutput,
    Custom,
}

impl NodeType {
    pub const ALL: [NodeType; 9] = [
        NodeType::AudioInput,
        NodeType::F0Extraction,
        NodeType::SpectrumAnalysis,
        NodeType::AperiodicityAnalysis,
        NodeType::ParameterMerge,
        NodeType::UtauMapping,
        NodeType::Synthesis,
        NodeType::AudioOutput,
        NodeType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::AudioInput => "AUDIO_INPUT",
            NodeType::F0Extraction => "F0_EXTRACTION",
            NodeType::SpectrumAnalysis => "SPECTRUM_ANALYSIS",
            NodeType::AperiodicityAnalysis => "APERIODICITY_ANALYSIS",
            NodeType::ParameterMerge => "PARAMETER_MERGE",
            NodeType::UtauMapping => "UTAU_MAPPING",
            NodeType::Synthesis => "SYNTHESIS",
            NodeType::AudioOutput => "AUDIO_OUTPUT",
            NodeType::Custom => "CUSTOM",
        }
    }

    /// Graph entry and exit points. These anchor dead-node elimination and are never fused.
    pub fn is_root(self) -> bool {
        matches!(self, NodeType::AudioInput | NodeType::AudioOutput)
    }

    pub fn is_analysis(self) -> bool {
        matches!(
            self,
            NodeType::F0Extraction | NodeType::SpectrumAnalysis | NodeType::AperiodicityAnalysis
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown node type '{s}'")))
    }
}

/// Everything besides the input audio that shapes an analysis node's result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisSettings {
    F0(F0Settings),
    Spectrum { fft_size: usize, q1: f64 },
    Aperiodicity { fft_size: usize, threshold: f64 },
}

/// Per-type payload.
#[derive(Clone)]
pub enum NodeKind {
    AudioInput(AudioInputNode),
    F0Extraction(F0Node),
    SpectrumAnalysis(SpectrumNode),
    AperiodicityAnalysis(AperiodicityNode),
    ParameterMerge(MergeNode),
    UtauMapping(UtauMappingNode),
    Synthesis(SynthesisNode),
    AudioOutput(AudioOutputNode),
    Custom(CustomNode),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::AudioInput(_) => NodeType::AudioInput,
            NodeKind::F0Extraction(_) => NodeType::F0Extraction,
            NodeKind::SpectrumAnalysis(_) => NodeType::SpectrumAnalysis,
            NodeKind::AperiodicityAnalysis(_) => NodeType::AperiodicityAnalysis,
            NodeKind::ParameterMerge(_) => NodeType::ParameterMerge,
            NodeKind::UtauMapping(_) => NodeType::UtauMapping,
            NodeKind::Synthesis(_) => NodeType::Synthesis,
            NodeKind::AudioOutput(_) => NodeType::AudioOutput,
            NodeKind::Custom(_) => NodeType::Custom,
        }
    }

    /// Bytes the payload holds beyond the node itself.
    fn payload_bytes(&self) -> usize {
        match self {
            NodeKind::AudioInput(input) => input.samples().len() * std::mem::size_of::<f32>(),
            NodeKind::AudioOutput(output) => output
                .path()
                .map_or(0, |p| p.as_os_str().len()),
            _ => 0,
        }
    }
}

/// One node of the WORLD processing graph.
#[derive(Clone)]
pub struct WorldNode {
    name: String,
    kind: NodeKind,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    backend: Option<SharedBackend>,
    simd_eligible: bool,
    fused_count: usize,
    footprint: usize,
    executions: u64,
}

impl WorldNode {
    fn create(pool: &MemoryPool, kind: NodeKind, inputs: usize, outputs: usize) -> Result<Self> {
        let node_type = kind.node_type();
        let payload = kind.payload_bytes();
        let mut sizes = vec![std::mem::size_of::<WorldNode>()];
        if payload > 0 {
            sizes.push(payload);
        }
        let regions = pool.alloc_many(&sizes)?;
        let (inputs, outputs) = port::layout(node_type, inputs, outputs);
        Ok(Self {
            name: node_type.as_str().to_ascii_lowercase(),
            kind,
            inputs,
            outputs,
            backend: None,
            simd_eligible: false,
            fused_count: 1,
            footprint: regions.iter().map(|r| r.size()).sum(),
            executions: 0,
        })
    }

    /// Audio source. An empty `samples` buffer makes the node read the
    /// input audio supplied to the execution context instead.
    pub fn audio_input(
        pool: &MemoryPool,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
    ) -> Result<Self> {
        let payload = AudioInputNode::new(samples.into(), sample_rate)?;
        Self::create(pool, NodeKind::AudioInput(payload), 0, 0)
    }

    pub fn f0_extraction(
        pool: &MemoryPool,
        frame_period: f64,
        f0_floor: f64,
        f0_ceil: f64,
    ) -> Result<Self> {
        let payload = F0Node::new(frame_period, f0_floor, f0_ceil)?;
        Self::create(pool, NodeKind::F0Extraction(payload), 0, 0)
    }

    pub fn spectrum_analysis(pool: &MemoryPool, fft_size: usize, q1: f64) -> Result<Self> {
        let payload = SpectrumNode::new(fft_size, q1)?;
        Self::create(pool, NodeKind::SpectrumAnalysis(payload), 0, 0)
    }

    pub fn aperiodicity_analysis(
        pool: &MemoryPool,
        fft_size: usize,
        threshold: f64,
    ) -> Result<Self> {
        let payload = AperiodicityNode::new(fft_size, threshold)?;
        Self::create(pool, NodeKind::AperiodicityAnalysis(payload), 0, 0)
    }

    pub fn parameter_merge(pool: &MemoryPool) -> Result<Self> {
        Self::create(pool, NodeKind::ParameterMerge(MergeNode::default()), 0, 0)
    }

    pub fn utau_mapping(pool: &MemoryPool) -> Result<Self> {
        Self::create(pool, NodeKind::UtauMapping(UtauMappingNode::default()), 0, 0)
    }

    pub fn synthesis(pool: &MemoryPool, sample_rate: u32, frame_period: f64) -> Result<Self> {
        let payload = SynthesisNode::new(sample_rate, frame_period)?;
        Self::create(pool, NodeKind::Synthesis(payload), 0, 0)
    }

    pub fn audio_output(pool: &MemoryPool, path: Option<PathBuf>) -> Result<Self> {
        Self::create(pool, NodeKind::AudioOutput(AudioOutputNode::new(path)), 0, 0)
    }

    /// User-defined node with `inputs`/`outputs` control ports.
    pub fn custom(
        pool: &MemoryPool,
        label: impl Into<String>,
        inputs: usize,
        outputs: usize,
        processor: Arc<dyn NodeProcessor>,
    ) -> Result<Self> {
        let label = label.into();
        let mut node = Self::create(
            pool,
            NodeKind::Custom(CustomNode::new(label.clone(), processor)),
            inputs,
            outputs,
        )?;
        node.name = label;
        Ok(node)
    }

    /// Node of `node_type` configured from block parameters, falling back to defaults.
    ///
    /// Custom nodes cannot be created this way since they need a processor.
    pub fn from_params(
        pool: &MemoryPool,
        node_type: NodeType,
        params: &BlockParams,
    ) -> Result<Self> {
        match node_type {
            NodeType::AudioInput => Self::audio_input(
                pool,
                Vec::<f32>::new(),
                params.get_or("sample_rate", f64::from(DEFAULT_SAMPLE_RATE)) as u32,
            ),
            NodeType::F0Extraction => Self::f0_extraction(
                pool,
                params.get_or("frame_period", DEFAULT_FRAME_PERIOD),
                params.get_or("f0_floor", DEFAULT_F0_FLOOR),
                params.get_or("f0_ceil", DEFAULT_F0_CEIL),
            ),
            NodeType::SpectrumAnalysis => Self::spectrum_analysis(
                pool,
                params.get_or("fft_size", DEFAULT_FFT_SIZE as f64) as usize,
                params.get_or("q1", DEFAULT_Q1),
            ),
            NodeType::AperiodicityAnalysis => Self::aperiodicity_analysis(
                pool,
                params.get_or("fft_size", DEFAULT_FFT_SIZE as f64) as usize,
                params.get_or("threshold", DEFAULT_AP_THRESHOLD),
            ),
            NodeType::ParameterMerge => Self::parameter_merge(pool),
            NodeType::UtauMapping => Self::utau_mapping(pool),
            NodeType::Synthesis => Self::synthesis(
                pool,
                params.get_or("sample_rate", f64::from(DEFAULT_SAMPLE_RATE)) as u32,
                params.get_or("frame_period", DEFAULT_FRAME_PERIOD),
            ),
            NodeType::AudioOutput => Self::audio_output(pool, None),
            NodeType::Custom => Err(Error::InvalidArgument(
                "custom nodes need a processor".into(),
            )),
        }
    }

    /// Replacement for `self` and `other` after fusion. Keeps `self`'s payload.
    pub(crate) fn fuse(&self, other: &WorldNode, pool: &MemoryPool) -> Result<Self> {
        if self.node_type() != other.node_type() {
            return Err(Error::InvalidArgument(format!(
                "cannot fuse {} with {}",
                self.node_type(),
                other.node_type()
            )));
        }
        let regions = pool.alloc_many(&[std::mem::size_of::<WorldNode>()])?;
        let mut fused = self.clone();
        fused.name = format!("{}+{}", self.name, other.name);
        fused.fused_count = self.fused_count + other.fused_count;
        fused.simd_eligible = false;
        fused.backend = None;
        fused.executions = 0;
        fused.footprint = regions.iter().map(|r| r.size()).sum();
        Ok(fused)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// `None` for every node that is not F0, spectrum or aperiodicity analysis.
    pub fn analysis_settings(&self) -> Option<AnalysisSettings> {
        match &self.kind {
            NodeKind::F0Extraction(node) => Some(AnalysisSettings::F0(*node.settings())),
            NodeKind::SpectrumAnalysis(node) => Some(AnalysisSettings::Spectrum {
                fft_size: node.fft_size(),
                q1: node.q1(),
            }),
            NodeKind::AperiodicityAnalysis(node) => Some(AnalysisSettings::Aperiodicity {
                fft_size: node.fft_size(),
                threshold: node.threshold(),
            }),
            _ => None,
        }
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input_type(&self, port: usize) -> Option<PortType> {
        self.inputs.get(port).map(|p| p.port_type)
    }

    pub fn output_type(&self, port: usize) -> Option<PortType> {
        self.outputs.get(port).map(|p| p.port_type)
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_simd_eligible(&self) -> bool {
        self.simd_eligible
    }

    pub(crate) fn set_simd_eligible(&mut self, eligible: bool) {
        self.simd_eligible = eligible;
    }

    /// Number of original nodes this node stands for (1 unless fused).
    pub fn fused_count(&self) -> usize {
        self.fused_count
    }

    /// Bytes charged to the pool when the node was created.
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    pub fn execution_count(&self) -> u64 {
        self.executions
    }

    /// Bind the vocoder backend. Calling it again on an initialized node does nothing.
    pub fn initialize(&mut self, backend: &SharedBackend) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        if let NodeKind::Custom(custom) = &self.kind {
            custom.processor().initialize()?;
        }
        self.backend = Some(Arc::clone(backend));
        tracing::trace!(node = %self.name, "initialized");
        Ok(())
    }

    /// Run the node's routine against `ctx`. Must follow [`initialize`](Self::initialize).
    pub fn execute(&mut self, ctx: &ProcessContext) -> Result<()> {
        let backend = self.backend.clone().ok_or_else(|| {
            Error::InvalidState(format!("node '{}' executed before initialize", self.name))
        })?;
        let backend = backend.as_ref();
        match &mut self.kind {
            NodeKind::AudioInput(node) => node.execute(ctx)?,
            NodeKind::F0Extraction(node) => node.execute(ctx, backend)?,
            NodeKind::SpectrumAnalysis(node) => node.execute(ctx, backend)?,
            NodeKind::AperiodicityAnalysis(node) => node.execute(ctx, backend)?,
            NodeKind::ParameterMerge(node) => node.execute(ctx)?,
            NodeKind::UtauMapping(node) => node.execute(ctx)?,
            NodeKind::Synthesis(node) => node.execute(ctx, backend)?,
            NodeKind::AudioOutput(node) => node.execute(ctx)?,
            NodeKind::Custom(node) => node.processor().process(ctx)?,
        }
        self.executions += 1;
        Ok(())
    }

    /// Release the backend binding and anything the payload allocated on its own.
    pub fn cleanup(&mut self) {
        match &mut self.kind {
            NodeKind::AudioOutput(node) => node.clear(),
            NodeKind::ParameterMerge(node) => node.reset(),
            NodeKind::Custom(node) => node.processor().cleanup(),
            _ => {}
        }
        self.backend = None;
    }

    /// Clear state that must not leak from one run into the next.
    pub(crate) fn begin_run(&mut self) {
        match &mut self.kind {
            NodeKind::ParameterMerge(node) => node.reset(),
            NodeKind::AudioOutput(node) => node.clear(),
            NodeKind::SpectrumAnalysis(node) => node.set_f0_ready(false),
            NodeKind::AperiodicityAnalysis(node) => node.set_f0_ready(false),
            _ => {}
        }
    }

    /// Record that the upstream producer feeding input `port` has finished.
    pub(crate) fn mark_input_ready(&mut self, port: usize) {
        let Some(port_type) = self.input_type(port) else {
            return;
        };
        match &mut self.kind {
            NodeKind::ParameterMerge(merge) => merge.mark_ready(port_type),
            NodeKind::SpectrumAnalysis(node) if port_type == PortType::F0 => {
                node.set_f0_ready(true)
            }
            NodeKind::AperiodicityAnalysis(node) if port_type == PortType::F0 => {
                node.set_f0_ready(true)
            }
            _ => {}
        }
    }
}

impl fmt::Debug for WorldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldNode")
            .field("name", &self.name)
            .field("type", &self.node_type())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("initialized", &self.is_initialized())
            .field("simd_eligible", &self.simd_eligible)
            .field("fused_count", &self.fused_count)
            .finish()
    }
}
