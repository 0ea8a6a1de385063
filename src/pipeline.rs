//! VoicePipeline that ties the graph, optimizer and execution context together

use crate::world::{
    AudioBuffer, ExecutionContext, ExecutionHandle, OptimizationStats, WorldGraph,
};
use crate::{Error, Result, VoicePipelineBuilder};
use etude_core::compat::Arc;

/// A built WORLD graph plus the context that runs it.
///
/// Every call to [`process`](Self::process) is one full run of the graph.
/// Runs are serialized by the context; a second call while one is in flight
/// fails with `InvalidState`.
///
/// # Example
///
/// ```ignore
/// use etude::prelude::*;
///
/// let pipeline = VoicePipeline::builder().build()?;
/// pipeline.context().set_progress_callback(|p, stage| println!("{stage}: {p:.1}"));
///
/// let rendered = pipeline.process(&samples, 44_100)?;
/// println!("{}", pipeline.context().stats());
/// ```
pub struct VoicePipeline {
    graph: Arc<WorldGraph>,
    context: ExecutionContext,
    optimization: Option<OptimizationStats>,
}

impl VoicePipeline {
    pub fn builder() -> VoicePipelineBuilder {
        VoicePipelineBuilder::default()
    }

    pub(crate) fn from_parts(
        graph: Arc<WorldGraph>,
        context: ExecutionContext,
        optimization: Option<OptimizationStats>,
    ) -> Self {
        Self {
            graph,
            context,
            optimization,
        }
    }

    /// Render `audio` through the graph and return the synthesized samples.
    pub fn process(&self, audio: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        self.context.set_input_audio(audio.to_vec(), sample_rate)?;
        self.context.execute(&self.graph)?;
        self.rendered().map(|buffer| buffer.samples.to_vec())
    }

    /// Start rendering `audio` on a background thread.
    ///
    /// Read the result with [`rendered`](Self::rendered) once the handle is done.
    pub fn process_async(&self, audio: &[f32], sample_rate: u32) -> Result<ExecutionHandle> {
        self.context.set_input_audio(audio.to_vec(), sample_rate)?;
        Ok(self.context.execute_async(Arc::clone(&self.graph))?)
    }

    /// Output of the last completed run.
    pub fn rendered(&self) -> Result<AudioBuffer> {
        self.context.output_audio().ok_or(Error::NoOutput)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn graph(&self) -> &Arc<WorldGraph> {
        &self.graph
    }

    /// `None` when the pipeline was built without optimization.
    pub fn optimization_stats(&self) -> Option<&OptimizationStats> {
        self.optimization.as_ref()
    }
}

impl std::fmt::Debug for VoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePipeline")
            .field("graph", &self.graph)
            .field("state", &self.context.state())
            .field("optimized", &self.optimization.is_some())
            .finish()
    }
}
