//! Stateful execution of a built [`WorldGraph`].
//!
//! An [`ExecutionContext`] runs a graph group by group following its
//! parallel plan. Between groups it observes a [`CancellationToken`], so
//! stop, pause and timeouts take effect at group boundaries and never
//! interrupt a node that is already running.
//!
//! ```ignore
//! let ctx = ExecutionContext::new(VoiceParameters::default())?;
//! ctx.set_input_audio(samples, 44_100)?;
//! ctx.set_progress_callback(|p, stage| println!("{:>3.0}% {stage}", p * 100.0));
//! ctx.execute(&graph)?;
//! let audio = ctx.output_audio();
//! ```

mod handle;
mod process;
mod progress;
mod state;
mod stats;

pub use handle::ExecutionHandle;
pub use process::{AudioBuffer, ProcessContext, SharedData};
pub use progress::{stage_for, ProgressCallback, MILESTONES, PROGRESS_INTERVAL};
pub use state::ExecutionState;
pub use stats::ExecutionStats;

use crate::config::ExecutionConfig;
use crate::error::ErrorCode;
use crate::graph::WorldGraph;
use crate::node::{AnalysisSettings, NodeId};
use crate::params::{VoiceParameters, WorldParameters};
use crate::port::PortType;
use crate::vocoder::{ReferenceVocoder, SharedBackend};
use crate::{Error, Result};
use etude_core::compat::{Arc, Condvar, Mutex, RwLock};
use etude_core::{
    AtomicFlag, AtomicProgress, CancellationToken, Checkpoint, TaskScheduler, WorkItem,
};
use progress::ProgressReporter;
use stats::StatsRecorder;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Callback receiving the outcome of every run.
pub type CompletionCallback = Arc<dyn Fn(std::result::Result<(), &Error>) + Send + Sync>;

/// Name of the thread started by [`ExecutionContext::execute_async`].
pub const EXECUTION_THREAD_NAME: &str = "etude-exec";

/// Milestone from which the analysis results are final.
const ANALYSIS_COMPLETE: usize = 4;

/// Analysis nodes of a graph in execution order, each with whether an F0
/// producer feeds it.
type AnalysisSignature = Vec<(AnalysisSettings, bool)>;

/// Analysis results of the last run, reused while the input audio and the
/// analysis nodes are unchanged.
struct AnalysisCache {
    input: Arc<[f32]>,
    sample_rate: u32,
    signature: AnalysisSignature,
    world: WorldParameters,
}

impl AnalysisCache {
    fn matches(&self, input: &AudioBuffer, signature: &AnalysisSignature) -> bool {
        self.sample_rate == input.sample_rate
            && self.signature == *signature
            && (Arc::ptr_eq(&self.input, &input.samples) || self.input[..] == input.samples[..])
    }
}

/// Hands the context back when a run ends, unwinding included.
struct Claim<'a>(&'a ExecutionContext);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct Shared {
    config: RwLock<ExecutionConfig>,
    process: ProcessContext,
    state: Mutex<ExecutionState>,
    busy: Mutex<bool>,
    idle: Condvar,
    token: CancellationToken,
    progress: AtomicProgress,
    stats: Mutex<ExecutionStats>,
    error: Mutex<Option<(ErrorCode, String)>>,
    caching: AtomicFlag,
    cache: Mutex<Option<AnalysisCache>>,
    progress_callback: RwLock<Option<ProgressCallback>>,
    completion_callback: RwLock<Option<CompletionCallback>>,
}

/// Runs built graphs and tracks the state of the current run.
///
/// Clones share the same state, so a clone can be handed to another thread
/// (or captured by a callback) to pause, resume or stop a run.
///
/// Callbacks are invoked on the thread executing the run. They may call
/// [`pause`](Self::pause), [`stop`](Self::stop) and the accessors, but must
/// not call [`reset`](Self::reset) or
/// [`wait_for_completion`](Self::wait_for_completion), which wait for the run
/// to finish.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<Shared>,
}

impl ExecutionContext {
    pub fn new(voice: VoiceParameters) -> Result<Self> {
        Self::with_config(voice, ExecutionConfig::default())
    }

    pub fn with_config(voice: VoiceParameters, config: ExecutionConfig) -> Result<Self> {
        Self::with_backend(voice, config, ReferenceVocoder::shared())
    }

    pub fn with_backend(
        voice: VoiceParameters,
        config: ExecutionConfig,
        backend: SharedBackend,
    ) -> Result<Self> {
        let process = ProcessContext::new(voice, backend, &config)?;
        let caching = AtomicFlag::new(config.enable_caching);
        tracing::debug!(
            threads = config.thread_count,
            pool = config.memory_pool_size,
            "execution context created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                process,
                state: Mutex::new(ExecutionState::Idle),
                busy: Mutex::new(false),
                idle: Condvar::new(),
                token: CancellationToken::new(),
                progress: AtomicProgress::default(),
                stats: Mutex::new(ExecutionStats::default()),
                error: Mutex::new(None),
                caching,
                cache: Mutex::new(None),
                progress_callback: RwLock::new(None),
                completion_callback: RwLock::new(None),
            }),
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run `graph` to completion on the calling thread.
    ///
    /// Uses the configured timeout, if any. A stop returns
    /// [`Error::Cancelled`] and leaves the context `Idle`; any other failure
    /// leaves it in `Error` with the failure recorded.
    pub fn execute(&self, graph: &WorldGraph) -> Result<()> {
        let timeout = self.shared.config.read().timeout;
        self.claim(graph)?;
        self.run_claimed(graph, timeout)
    }

    /// Like [`execute`](Self::execute), failing with [`Error::Timeout`] once
    /// `timeout` has elapsed at a group boundary.
    pub fn execute_with_timeout(&self, graph: &WorldGraph, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidArgument("timeout must be non-zero".into()));
        }
        self.claim(graph)?;
        self.run_claimed(graph, Some(timeout))
    }

    /// Run `graph` on a dedicated thread.
    ///
    /// The context is claimed before this returns, so a second call fails
    /// with `InvalidState` until the run finishes. The outcome reaches the
    /// completion callback and [`ExecutionHandle::wait`].
    pub fn execute_async(&self, graph: Arc<WorldGraph>) -> Result<ExecutionHandle> {
        let timeout = self.shared.config.read().timeout;
        self.claim(&graph)?;
        let ctx = self.clone();
        let spawned = std::thread::Builder::new()
            .name(EXECUTION_THREAD_NAME.into())
            .spawn(move || ctx.run_claimed(&graph, timeout));
        match spawned {
            Ok(thread) => Ok(ExecutionHandle::new(thread)),
            Err(e) => {
                let error = Error::from(etude_core::Error::Spawn(e.to_string()));
                self.record_error(error.code(), error.to_string());
                self.notify_completion(Err(&error));
                self.release();
                Err(error)
            }
        }
    }

    /// Take ownership of the context for one run.
    fn claim(&self, graph: &WorldGraph) -> Result<()> {
        {
            let mut busy = self.shared.busy.lock();
            if *busy {
                return Err(Error::InvalidState(format!(
                    "cannot execute while {}",
                    self.state()
                )));
            }
            *busy = true;
        }
        self.shared.token.reset();
        self.shared.progress.set(0.0);
        *self.shared.stats.lock() = ExecutionStats {
            total_nodes: graph.node_count(),
            ..Default::default()
        };
        self.force_state(ExecutionState::Initializing);
        Ok(())
    }

    fn run_claimed(&self, graph: &WorldGraph, timeout: Option<Duration>) -> Result<()> {
        let _claim = Claim(self);
        let started = Instant::now();
        self.shared
            .token
            .set_deadline(timeout.map(|t| started + t));
        tracing::info!(
            nodes = graph.node_count(),
            groups = graph.parallel_plan().group_count(),
            timeout = ?timeout,
            "execution started"
        );
        let recorder = StatsRecorder::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive(graph, &recorder, timeout)
        }))
        .unwrap_or_else(|_| {
            Err(Error::Execution {
                code: ErrorCode::Runtime,
                message: "execution panicked".into(),
            })
        });
        self.finish(outcome, started, &recorder)
    }

    fn drive(
        &self,
        graph: &WorldGraph,
        recorder: &StatsRecorder,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let shared = &*self.shared;
        let process = &shared.process;
        let (thread_count, profile) = {
            let config = shared.config.read();
            (config.thread_count, config.enable_profiling)
        };

        process.begin_run()?;
        let backend = Arc::clone(process.backend());
        for id in 0..graph.node_count() {
            let mut node = lock_node(graph, id)?;
            node.begin_run();
            node.initialize(&backend)?;
        }
        let signature = analysis_signature(graph)?;
        let cache_hit = self.restore_cached_analysis(&signature)?;

        self.checkpoint(timeout)?;
        self.transition(ExecutionState::Running)?;

        let scheduler = TaskScheduler::new(thread_count)?;
        let mut reporter =
            ProgressReporter::new(shared.progress_callback.read().clone(), PROGRESS_INTERVAL);
        let mut captured = !shared.caching.get() || cache_hit;

        for group in &graph.parallel_plan().groups {
            self.checkpoint(timeout)?;

            let stage = group
                .iter()
                .filter_map(|&id| graph.node_type(id).and_then(stage_for))
                .max();
            if let Some(stage) = stage {
                if !captured && stage >= ANALYSIS_COMPLETE {
                    self.capture_analysis(&signature);
                    captured = true;
                }
                reporter.reach(stage, &shared.progress);
            }

            let items: Vec<WorkItem<'_, Error>> = group
                .iter()
                .map(|&id| {
                    Box::new(move || self.run_node(graph, id, recorder, cache_hit, profile))
                        as WorkItem<'_, Error>
                })
                .collect();
            scheduler.run_group(items)?;
            mark_consumers_ready(graph, group);
        }

        self.checkpoint(timeout)?;
        if !captured {
            self.capture_analysis(&signature);
        }
        reporter.finish(&shared.progress);
        tracing::trace!(callbacks = reporter.emitted(), "progress reported");
        Ok(())
    }

    fn run_node(
        &self,
        graph: &WorldGraph,
        id: NodeId,
        recorder: &StatsRecorder,
        skip_analysis: bool,
        profile: bool,
    ) -> Result<()> {
        let mut node = lock_node(graph, id)?;
        let node_type = node.node_type();
        if skip_analysis && node_type.is_analysis() {
            recorder.record_cache_hit();
            tracing::trace!(node = node.name(), "analysis reused from cache");
            return Ok(());
        }
        let started = Instant::now();
        if let Err(e) = node.execute(&self.shared.process) {
            tracing::warn!(node = node.name(), error = %e, "node failed");
            return Err(e);
        }
        let elapsed = started.elapsed();
        if profile {
            tracing::debug!(node = node.name(), ?elapsed, "node executed");
        }
        recorder.record(id, node_type, elapsed, profile);
        Ok(())
    }

    fn finish(
        &self,
        outcome: Result<()>,
        started: Instant,
        recorder: &StatsRecorder,
    ) -> Result<()> {
        let shared = &*self.shared;
        // a stop wins over whatever the run was doing when it was requested
        let outcome = match outcome {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            _ if shared.token.is_stopped() => Err(Error::Cancelled),
            other => other,
        };

        let elapsed = started.elapsed();
        {
            let mut stats = shared.stats.lock();
            recorder.finish(&mut stats);
            stats.total_execution_time = elapsed;
            stats.memory_usage = shared.process.memory_usage();
            stats.peak_memory_usage = shared.process.peak_memory_usage();
        }

        match &outcome {
            Ok(()) => {
                shared.progress.set(1.0);
                self.force_state(ExecutionState::Completed);
                tracing::info!(
                    ?elapsed,
                    nodes = recorder.nodes_executed(),
                    "execution completed"
                );
            }
            Err(Error::Cancelled) => {
                self.force_state(ExecutionState::Idle);
                tracing::info!(?elapsed, "execution stopped");
            }
            Err(e) => self.record_error(e.code(), e.to_string()),
        }

        self.notify_completion(outcome.as_ref().map(|_| ()));
        outcome
    }

    fn checkpoint(&self, timeout: Option<Duration>) -> Result<()> {
        match self.shared.token.checkpoint() {
            Checkpoint::Continue => Ok(()),
            Checkpoint::Stopped => Err(Error::Cancelled),
            Checkpoint::DeadlineExceeded => Err(Error::Timeout(timeout.unwrap_or_default())),
        }
    }

    fn release(&self) {
        let mut busy = self.shared.busy.lock();
        *busy = false;
        self.shared.idle.notify_all();
    }

    fn notify_completion(&self, outcome: std::result::Result<(), &Error>) {
        let callback = self.shared.completion_callback.read().clone();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }

    // =========================================================================
    // Analysis cache
    // =========================================================================

    fn restore_cached_analysis(&self, signature: &AnalysisSignature) -> Result<bool> {
        if !self.shared.caching.get() || signature.is_empty() {
            return Ok(false);
        }
        let Some(input) = self.shared.process.input_audio() else {
            return Ok(false);
        };
        let world = {
            let cache = self.shared.cache.lock();
            match cache.as_ref() {
                Some(cached) if cached.matches(&input, signature) => cached.world.clone(),
                _ => return Ok(false),
            }
        };
        self.shared.process.restore_world(world)?;
        tracing::debug!("reusing cached analysis");
        Ok(true)
    }

    fn capture_analysis(&self, signature: &AnalysisSignature) {
        if signature.is_empty() {
            return;
        }
        let process = &self.shared.process;
        let Some(input) = process.input_audio() else {
            return;
        };
        let world = process.world_snapshot();
        if !world.has_f0() && !world.has_spectrogram() && !world.has_aperiodicity() {
            return;
        }
        *self.shared.cache.lock() = Some(AnalysisCache {
            input: input.samples,
            sample_rate: input.sample_rate,
            signature: signature.clone(),
            world,
        });
    }

    pub fn enable_caching(&self, enable: bool) {
        self.shared.caching.set(enable);
        if !enable {
            self.clear_cache();
        }
    }

    pub fn is_caching_enabled(&self) -> bool {
        self.shared.caching.get()
    }

    pub fn clear_cache(&self) {
        *self.shared.cache.lock() = None;
    }

    pub fn has_cached_analysis(&self) -> bool {
        self.shared.cache.lock().is_some()
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Hold the run at the next group boundary. Only valid while `Running`.
    pub fn pause(&self) -> Result<()> {
        self.transition(ExecutionState::Paused)?;
        self.shared.token.pause();
        Ok(())
    }

    /// Only valid while `Paused`.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != ExecutionState::Paused {
            return Err(Error::InvalidState(format!("cannot resume while {}", *state)));
        }
        *state = ExecutionState::Running;
        drop(state);
        self.shared.token.resume();
        tracing::debug!("execution resumed");
        Ok(())
    }

    /// Ask the current run to stop. Only valid while `Running` or `Paused`.
    ///
    /// The context is `Idle` when this returns; the run itself unwinds at its
    /// next group boundary.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.is_stoppable() {
            return Err(Error::InvalidState(format!("cannot stop while {}", *state)));
        }
        *state = ExecutionState::Idle;
        drop(state);
        self.shared.token.stop();
        tracing::debug!("stop requested");
        Ok(())
    }

    /// Stop any run, wait for it to unwind, then clear state, stats and error.
    ///
    /// Unlike [`stop`](Self::stop) this also cancels a run that is still initializing.
    pub fn reset(&self) {
        if self.state().is_active() {
            self.force_state(ExecutionState::Idle);
            self.shared.token.stop();
        }
        self.wait_for_completion(None);
        self.shared.token.reset();
        self.shared.progress.set(0.0);
        *self.shared.stats.lock() = ExecutionStats::default();
        *self.shared.error.lock() = None;
        self.force_state(ExecutionState::Idle);
    }

    /// Block until no run owns the context. Returns `false` if `timeout`
    /// elapsed first.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut busy = self.shared.busy.lock();
        while *busy {
            match deadline {
                Some(deadline) => {
                    if self.shared.idle.wait_until(&mut busy, deadline).timed_out() {
                        return !*busy;
                    }
                }
                None => self.shared.idle.wait(&mut busy),
            }
        }
        true
    }

    fn transition(&self, next: ExecutionState) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "cannot go from {} to {next}",
                *state
            )));
        }
        tracing::debug!(from = %*state, to = %next, "execution state");
        *state = next;
        Ok(())
    }

    fn force_state(&self, next: ExecutionState) {
        let mut state = self.shared.state.lock();
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "execution state");
            *state = next;
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> ExecutionState {
        *self.shared.state.lock()
    }

    /// `Initializing` or `Running`.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ExecutionState::Initializing | ExecutionState::Running
        )
    }

    pub fn is_complete(&self) -> bool {
        self.state() == ExecutionState::Completed
    }

    /// 1.0 once completed, 0.0 when idle or failed, otherwise the last milestone.
    pub fn progress(&self) -> f32 {
        match self.state() {
            ExecutionState::Completed => 1.0,
            ExecutionState::Idle | ExecutionState::Error => 0.0,
            _ => self.shared.progress.get(),
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> ExecutionStats {
        self.shared.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.shared.stats.lock() = ExecutionStats::default();
    }

    pub fn execution_time(&self) -> Duration {
        self.shared.stats.lock().total_execution_time
    }

    /// Bytes currently charged to the run arena.
    pub fn memory_usage(&self) -> usize {
        self.shared.process.memory_usage()
    }

    // =========================================================================
    // Errors
    // =========================================================================

    pub fn last_error(&self) -> Option<ErrorCode> {
        self.shared.error.lock().as_ref().map(|(code, _)| *code)
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared
            .error
            .lock()
            .as_ref()
            .map(|(_, message)| message.clone())
    }

    /// Forget the recorded error. A context in `Error` returns to `Idle`.
    pub fn clear_error(&self) {
        *self.shared.error.lock() = None;
        let mut state = self.shared.state.lock();
        if *state == ExecutionState::Error {
            *state = ExecutionState::Idle;
        }
    }

    /// Record a failure, move to `Error` and report it to the completion callback.
    pub fn handle_error(&self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        self.record_error(code, message.clone());
        self.notify_completion(Err(&Error::Execution { code, message }));
    }

    fn record_error(&self, code: ErrorCode, message: String) {
        tracing::error!(code = code.as_i32(), "{message}");
        *self.shared.error.lock() = Some((code, message));
        self.force_state(ExecutionState::Error);
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn config(&self) -> ExecutionConfig {
        self.shared.config.read().clone()
    }

    pub fn thread_count(&self) -> usize {
        self.shared.config.read().thread_count
    }

    /// Rejected while a run owns the context.
    pub fn set_thread_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument("thread count must be at least 1".into()));
        }
        self.ensure_idle("change the thread count")?;
        self.shared.config.write().thread_count = count;
        Ok(())
    }

    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(f32, &str) + Send + Sync + 'static,
    {
        *self.shared.progress_callback.write() = Some(Arc::new(callback));
    }

    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: Fn(std::result::Result<(), &Error>) + Send + Sync + 'static,
    {
        *self.shared.completion_callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        *self.shared.progress_callback.write() = None;
        *self.shared.completion_callback.write() = None;
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if *self.shared.busy.lock() {
            return Err(Error::InvalidState(format!(
                "cannot {action} while {}",
                self.state()
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// The per-run data the nodes read and write.
    pub fn process(&self) -> &ProcessContext {
        &self.shared.process
    }

    pub fn voice_parameters(&self) -> VoiceParameters {
        self.shared.process.voice()
    }

    pub fn set_voice_parameters(&self, voice: VoiceParameters) -> Result<()> {
        self.ensure_idle("change voice parameters")?;
        self.shared.process.set_voice(voice)
    }

    pub fn set_input_audio(&self, samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<()> {
        self.ensure_idle("replace the input audio")?;
        self.shared.process.set_input_audio(samples, sample_rate)
    }

    pub fn world_parameters(&self) -> WorldParameters {
        self.shared.process.world_snapshot()
    }

    pub fn output_audio(&self) -> Option<AudioBuffer> {
        self.shared.process.output_audio()
    }

    /// Replace the shared-data slots with `count` empty ones.
    pub fn allocate_shared_data(&self, count: usize) -> Result<()> {
        self.ensure_idle("reallocate shared data")?;
        self.shared.process.allocate_shared_data(count)
    }

    pub fn set_shared_data(&self, index: usize, data: Option<SharedData>) -> Result<()> {
        self.shared.process.set_shared_data(index, data)
    }

    pub fn shared_data(&self, index: usize) -> Result<Option<SharedData>> {
        self.shared.process.shared_data(index)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("state", &self.state())
            .field("progress", &self.shared.progress.get())
            .field("last_error", &self.last_error())
            .field("process", &self.shared.process)
            .finish()
    }
}

fn analysis_signature(graph: &WorldGraph) -> Result<AnalysisSignature> {
    let mut signature = Vec::new();
    for &id in graph.topological_order() {
        let node = lock_node(graph, id)?;
        if let Some(settings) = node.analysis_settings() {
            let guided = graph
                .incoming(id)
                .any(|c| node.input_type(c.dest_port) == Some(PortType::F0));
            signature.push((settings, guided));
        }
    }
    Ok(signature)
}

fn lock_node(
    graph: &WorldGraph,
    id: NodeId,
) -> Result<etude_core::compat::MutexGuard<'_, crate::node::WorldNode>> {
    graph
        .lock(id)
        .ok_or_else(|| Error::NotFound(format!("node {id} in graph")))
}

/// Tell every consumer of `group` that its producers finished.
fn mark_consumers_ready(graph: &WorldGraph, group: &[NodeId]) {
    for &id in group {
        for connection in graph.outgoing(id) {
            if let Some(mut dest) = graph.lock(connection.dest) {
                dest.mark_input_ready(connection.dest_port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeProcessor, NodeType, WorldNode, DEFAULT_Q1};
    use crate::{BuilderConfig, GraphBuilder};
    use etude_core::compat::{AtomicUsize, Ordering};

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16_000.0).sin() * 0.5)
            .collect()
    }

    fn voice() -> VoiceParameters {
        VoiceParameters {
            sample_rate: 16_000,
            ..Default::default()
        }
    }

    fn canonical_graph() -> Arc<WorldGraph> {
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        let input = b.add_default_node(NodeType::AudioInput).unwrap();
        let f0 = b.add_default_node(NodeType::F0Extraction).unwrap();
        let spectrum = b.add_default_node(NodeType::SpectrumAnalysis).unwrap();
        let synth = b
            .add_node(WorldNode::synthesis(b.pool(), 16_000, 5.0).unwrap())
            .unwrap();
        let output = b.add_default_node(NodeType::AudioOutput).unwrap();
        b.connect_nodes(input, 0, f0, 0).unwrap();
        b.connect_nodes(input, 0, spectrum, 0).unwrap();
        b.connect_nodes(f0, 0, synth, 0).unwrap();
        b.connect_nodes(spectrum, 0, synth, 1).unwrap();
        b.connect_nodes(synth, 0, output, 0).unwrap();
        b.build().unwrap()
    }

    fn context() -> ExecutionContext {
        let ctx = ExecutionContext::new(voice()).unwrap();
        ctx.set_input_audio(tone(1600), 16_000).unwrap();
        ctx
    }

    #[test]
    fn test_execute_completes() {
        let graph = canonical_graph();
        let ctx = context();
        ctx.execute(&graph).unwrap();

        assert_eq!(ctx.state(), ExecutionState::Completed);
        assert!(ctx.is_complete());
        assert_eq!(ctx.progress(), 1.0);
        let stats = ctx.stats();
        assert!(stats.total_execution_time > Duration::ZERO);
        assert_eq!(stats.nodes_executed, 5);
        assert_eq!(stats.total_nodes, 5);
        assert!(ctx.world_parameters().has_f0());
        assert!(!ctx.output_audio().unwrap().samples.is_empty());
    }

    #[test]
    fn test_pause_and_resume_need_the_right_state() {
        let ctx = context();
        assert!(matches!(ctx.pause(), Err(Error::InvalidState(_))));
        assert!(matches!(ctx.resume(), Err(Error::InvalidState(_))));
        assert!(matches!(ctx.stop(), Err(Error::InvalidState(_))));
        assert_eq!(ctx.state(), ExecutionState::Idle);
    }

    #[test]
    fn test_stop_from_callback_lands_in_idle() {
        let graph = canonical_graph();
        let ctx = context();
        let control = ctx.clone();
        ctx.set_progress_callback(move |_, _| {
            let _ = control.stop();
        });
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        ctx.set_completion_callback(move |outcome| {
            assert!(matches!(outcome, Err(Error::Cancelled)));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(ctx.execute(&graph), Err(Error::Cancelled)));
        assert_eq!(ctx.state(), ExecutionState::Idle);
        assert_eq!(ctx.last_error(), None);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_from_callback_then_resume() {
        let graph = canonical_graph();
        let ctx = context();
        let control = ctx.clone();
        let paused = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&paused);
        ctx.set_progress_callback(move |_, _| {
            if flag.load(Ordering::SeqCst) == 0 && control.pause().is_ok() {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });
        let handle = ctx.execute_async(Arc::clone(&graph)).unwrap();

        let started = Instant::now();
        while ctx.state() != ExecutionState::Paused {
            assert!(started.elapsed() < Duration::from_secs(5), "never paused");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!handle.is_done());
        ctx.resume().unwrap();
        handle.wait().unwrap();
        assert_eq!(ctx.state(), ExecutionState::Completed);
        assert_eq!(paused.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_execute_rejected() {
        let graph = canonical_graph();
        let ctx = context();
        let inner = ctx.clone();
        let nested = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&nested);
        let graph_ref = Arc::clone(&graph);
        ctx.set_progress_callback(move |_, _| {
            let mut slot = slot.lock();
            if slot.is_none() {
                *slot = Some(inner.execute(&graph_ref).is_err());
            }
        });
        ctx.execute(&graph).unwrap();
        assert_eq!(*nested.lock(), Some(true));
    }

    struct Failing;

    impl NodeProcessor for Failing {
        fn process(&self, _ctx: &ProcessContext) -> Result<()> {
            Err(Error::InvalidArgument("broken processor".into()))
        }
    }

    #[test]
    fn test_node_failure_recorded() {
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        b.add_node(WorldNode::custom(b.pool(), "broken", 0, 0, Arc::new(Failing)).unwrap())
            .unwrap();
        let graph = b.build().unwrap();

        let ctx = context();
        let reported = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&reported);
        ctx.set_completion_callback(move |outcome| {
            if outcome.is_err() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(ctx.execute(&graph).is_err());
        assert_eq!(ctx.state(), ExecutionState::Error);
        assert_eq!(ctx.last_error(), Some(ErrorCode::InvalidArgument));
        assert!(ctx.error_message().unwrap().contains("broken processor"));
        assert_eq!(ctx.progress(), 0.0);
        assert_eq!(reported.load(Ordering::SeqCst), 1);

        ctx.clear_error();
        assert_eq!(ctx.last_error(), None);
        assert_eq!(ctx.state(), ExecutionState::Idle);
    }

    struct Slow(Duration);

    impl NodeProcessor for Slow {
        fn process(&self, _ctx: &ProcessContext) -> Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_timeout_moves_to_error() {
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        let slow = Arc::new(Slow(Duration::from_millis(30)));
        let a = b
            .add_node(WorldNode::custom(b.pool(), "slow", 0, 1, slow).unwrap())
            .unwrap();
        let idle = Arc::new(Slow(Duration::ZERO));
        let c = b
            .add_node(WorldNode::custom(b.pool(), "after", 1, 0, idle).unwrap())
            .unwrap();
        b.connect_nodes(a, 0, c, 0).unwrap();
        let graph = b.build().unwrap();

        let ctx = context();
        let err = ctx
            .execute_with_timeout(&graph, Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(ctx.state(), ExecutionState::Error);
        assert_eq!(ctx.last_error(), Some(ErrorCode::Timeout));
        assert!(ctx.error_message().unwrap().contains("timed out"));
    }

    #[test]
    fn test_handle_error_reaches_callback() {
        let ctx = context();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        ctx.set_completion_callback(move |outcome| {
            if let Err(e) = outcome {
                sink.lock().push(e.to_string());
            }
        });
        ctx.handle_error(ErrorCode::Runtime, "vocoder crashed");
        assert_eq!(ctx.state(), ExecutionState::Error);
        assert_eq!(ctx.error_message().as_deref(), Some("vocoder crashed"));
        assert!(messages.lock()[0].contains("vocoder crashed"));
    }

    #[test]
    fn test_cached_analysis_is_reused() {
        let graph = canonical_graph();
        let ctx = context();
        assert!(ctx.is_caching_enabled());
        ctx.execute(&graph).unwrap();
        assert!(ctx.has_cached_analysis());
        let first = ctx.world_parameters();

        ctx.execute(&graph).unwrap();
        let stats = ctx.stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.nodes_executed, 3);
        assert_eq!(ctx.world_parameters().f0, first.f0);

        // Same samples in a fresh buffer still hit
        ctx.set_input_audio(tone(1600), 16_000).unwrap();
        ctx.execute(&graph).unwrap();
        assert_eq!(ctx.stats().cache_hits, 2);

        ctx.set_input_audio(tone(1800), 16_000).unwrap();
        ctx.execute(&graph).unwrap();
        assert_eq!(ctx.stats().cache_hits, 0);

        ctx.enable_caching(false);
        assert!(!ctx.has_cached_analysis());
    }

    fn spectrum_graph(fft_size: usize) -> Arc<WorldGraph> {
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        let input = b.add_default_node(NodeType::AudioInput).unwrap();
        let spectrum = b
            .add_node(WorldNode::spectrum_analysis(b.pool(), fft_size, DEFAULT_Q1).unwrap())
            .unwrap();
        b.connect_nodes(input, 0, spectrum, 0).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_cache_follows_analysis_settings() {
        let ctx = context();
        ctx.execute(&spectrum_graph(512)).unwrap();
        assert_eq!(ctx.world_parameters().fft_size, 512);

        ctx.execute(&spectrum_graph(2048)).unwrap();
        assert_eq!(ctx.stats().cache_hits, 0);
        assert_eq!(ctx.world_parameters().fft_size, 2048);
        assert_eq!(ctx.world_parameters().spectrogram[0].len(), 1025);

        // A separately built graph with the same settings reuses the analysis
        ctx.execute(&spectrum_graph(2048)).unwrap();
        assert_eq!(ctx.stats().cache_hits, 1);
        assert_eq!(ctx.world_parameters().fft_size, 2048);

        // An extra F0 node changes the signature
        ctx.execute(&canonical_graph()).unwrap();
        assert_eq!(ctx.stats().cache_hits, 0);
    }

    struct Panicking;

    impl NodeProcessor for Panicking {
        fn process(&self, _ctx: &ProcessContext) -> Result<()> {
            panic!("processor fault")
        }
    }

    #[test]
    fn test_panic_fails_the_run_and_releases_the_context() {
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        b.add_node(WorldNode::custom(b.pool(), "faulty", 0, 0, Arc::new(Panicking)).unwrap())
            .unwrap();
        let graph = b.build().unwrap();

        let ctx = context();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        ctx.set_completion_callback(move |outcome| {
            if outcome.is_err() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = ctx.execute(&graph).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Runtime);
        assert_eq!(ctx.state(), ExecutionState::Error);
        assert_eq!(ctx.last_error(), Some(ErrorCode::Runtime));
        assert!(ctx.wait_for_completion(Some(Duration::from_millis(10))));
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        let handle = ctx.execute_async(Arc::clone(&graph)).unwrap();
        assert!(handle.wait().is_err());
        assert_eq!(ctx.state(), ExecutionState::Error);
        assert_eq!(failures.load(Ordering::SeqCst), 2);

        // A panicking callback outside any node is caught the same way
        ctx.set_progress_callback(|_, _| panic!("callback fault"));
        let err = ctx.execute(&canonical_graph()).unwrap_err();
        assert!(matches!(
            err,
            Error::Execution {
                code: ErrorCode::Runtime,
                ..
            }
        ));
        assert_eq!(failures.load(Ordering::SeqCst), 3);

        ctx.clear_callbacks();
        ctx.execute(&canonical_graph()).unwrap();
        assert_eq!(ctx.state(), ExecutionState::Completed);
    }

    struct StopDuringInit {
        control: ExecutionContext,
        rejected: Mutex<Option<bool>>,
    }

    impl NodeProcessor for StopDuringInit {
        fn initialize(&self) -> Result<()> {
            let outcome = self.control.stop();
            *self.rejected.lock() = Some(matches!(outcome, Err(Error::InvalidState(_))));
            Ok(())
        }

        fn process(&self, _ctx: &ProcessContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stop_rejected_while_initializing() {
        let ctx = context();
        let processor = Arc::new(StopDuringInit {
            control: ctx.clone(),
            rejected: Mutex::new(None),
        });
        let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
        let shared: Arc<dyn NodeProcessor> = processor.clone();
        b.add_node(WorldNode::custom(b.pool(), "stopper", 0, 0, shared).unwrap())
            .unwrap();
        let graph = b.build().unwrap();

        ctx.execute(&graph).unwrap();
        assert_eq!(*processor.rejected.lock(), Some(true));
        assert_eq!(ctx.state(), ExecutionState::Completed);
    }

    #[test]
    fn test_settings_rejected_while_running() {
        let graph = canonical_graph();
        let ctx = context();
        let control = ctx.clone();
        let rejected = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&rejected);
        ctx.set_progress_callback(move |_, _| {
            if control.set_thread_count(2).is_err() {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        ctx.execute(&graph).unwrap();
        assert!(rejected.load(Ordering::SeqCst) >= 1);
        ctx.set_thread_count(2).unwrap();
        assert_eq!(ctx.thread_count(), 2);
        assert!(ctx.set_thread_count(0).is_err());
    }

    #[test]
    fn test_reset_clears_everything() {
        let ctx = context();
        ctx.handle_error(ErrorCode::Runtime, "boom");
        ctx.reset();
        assert_eq!(ctx.state(), ExecutionState::Idle);
        assert_eq!(ctx.last_error(), None);
        assert_eq!(ctx.stats(), ExecutionStats::default());
        assert!(ctx.wait_for_completion(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_shared_data_slots() {
        let ctx = context();
        ctx.allocate_shared_data(2).unwrap();
        ctx.set_shared_data(1, Some(Arc::new(7u32))).unwrap();
        let value = ctx.shared_data(1).unwrap().unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
        assert!(matches!(
            ctx.set_shared_data(2, None),
            Err(Error::InvalidArgument(_))
        ));
    }
}
