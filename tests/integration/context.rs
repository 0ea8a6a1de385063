//! Execution context integration tests
//!
//! Runs real graphs through the context and checks the externally visible
//! contract: state, progress, statistics, errors and run control.

use crate::helpers::*;
use etude::prelude::*;
use etude::world::context::MILESTONES;
use etude::world::{Error as WorldError, ErrorCode, ExecutionStats, NodeProcessor, ProcessContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn test_canonical_run_completes() {
    let graph = canonical_graph();
    let ctx = test_context();
    assert_eq!(ctx.state(), ExecutionState::Idle);

    ctx.execute(&graph).unwrap();

    assert_eq!(ctx.state(), ExecutionState::Completed);
    assert_eq!(ctx.progress(), 1.0);
    assert!(!ctx.is_running());
    assert_eq!(ctx.last_error(), None);

    let stats = ctx.stats();
    assert!(stats.total_execution_time > Duration::ZERO);
    assert_eq!(stats.nodes_executed, 8);
    assert_eq!(stats.total_nodes, 8);
    assert_eq!(stats.cache_hits, 0);
    assert!(stats.peak_memory_usage >= stats.memory_usage);
    assert_eq!(ctx.execution_time(), stats.total_execution_time);

    let world = ctx.world_parameters();
    assert!(world.is_complete());
    assert_eq!(
        world.f0_length(),
        WorldParameters::frame_count(3200, TEST_SAMPLE_RATE, TEST_FRAME_PERIOD)
    );

    let output = ctx.output_audio().unwrap();
    assert_eq!(output.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(output.samples.len(), 3200);
    assert_has_audio(&output.samples, tolerances::SILENCE_THRESHOLD);
}

/// The callback sees milestones in order, at most once per throttle interval.
#[test]
fn test_progress_is_ordered_and_throttled() {
    let graph = canonical_graph();
    let ctx = test_context();
    let seen = Arc::new(Mutex::new(Vec::<(f32, String)>::new()));
    let sink = Arc::clone(&seen);
    ctx.set_progress_callback(move |p, stage| sink.lock().unwrap().push((p, stage.to_string())));

    let started = Instant::now();
    ctx.execute(&graph).unwrap();
    let elapsed = started.elapsed();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen[0], (0.0, "Starting execution".to_string()));
    let allowed = (elapsed.as_millis() / 100) as usize + 1;
    assert!(seen.len() <= allowed, "{} calls in {elapsed:?}", seen.len());

    for pair in seen.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
    for (p, stage) in seen.iter() {
        assert!(MILESTONES.iter().any(|&(v, label)| v == *p && label == stage));
    }
}

/// Merge fails with `NotReady` when one of its analyses is never produced.
#[test]
fn test_merge_waits_for_every_analysis() {
    let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
    let input = b.add_default_node(NodeType::AudioInput).unwrap();
    let f0 = b.add_default_node(NodeType::F0Extraction).unwrap();
    let spectrum = b.add_default_node(NodeType::SpectrumAnalysis).unwrap();
    let merge = b.add_default_node(NodeType::ParameterMerge).unwrap();
    b.connect_nodes(input, 0, f0, 0).unwrap();
    b.connect_nodes(input, 0, spectrum, 0).unwrap();
    b.connect_nodes(f0, 0, merge, 0).unwrap();
    b.connect_nodes(spectrum, 0, merge, 1).unwrap();
    let partial = b.build().unwrap();

    let ctx = test_context();
    let err = ctx.execute(&partial).unwrap_err();
    assert!(matches!(err, WorldError::NotReady("aperiodicity")));
    assert_eq!(ctx.state(), ExecutionState::Error);
    assert_eq!(ctx.last_error(), Some(ErrorCode::NotReady));
    assert!(ctx.error_message().unwrap().contains("aperiodicity"));

    ctx.clear_error();
    ctx.execute(&canonical_graph()).unwrap();
    assert_eq!(ctx.state(), ExecutionState::Completed);
}

#[test]
fn test_second_run_reuses_analysis() {
    let graph = canonical_graph();
    let ctx = test_context();
    ctx.execute(&graph).unwrap();
    let first = ctx.output_audio().unwrap();
    assert!(ctx.has_cached_analysis());

    ctx.execute(&graph).unwrap();
    let stats = ctx.stats();
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.nodes_executed, 5);
    assert_eq!(ctx.output_audio().unwrap().samples, first.samples);

    ctx.clear_cache();
    assert!(!ctx.has_cached_analysis());
    ctx.execute(&graph).unwrap();
    assert_eq!(ctx.stats().cache_hits, 0);
}

#[test]
fn test_single_thread_matches_pool() {
    let graph = canonical_graph();
    let pooled = test_context();
    pooled.execute(&graph).unwrap();

    let config = ExecutionConfig {
        thread_count: 1,
        ..Default::default()
    };
    let serial = ExecutionContext::with_config(test_voice(), config).unwrap();
    serial
        .set_input_audio(generate_sine(220.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .unwrap();
    serial.execute(&graph).unwrap();

    assert_eq!(
        serial.output_audio().unwrap().samples,
        pooled.output_audio().unwrap().samples
    );
}

#[test]
fn test_async_run_and_wait() {
    let graph = canonical_graph();
    let ctx = test_context();
    let completions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&completions);
    ctx.set_completion_callback(move |outcome| {
        assert!(outcome.is_ok());
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let handle = ctx.execute_async(Arc::clone(&graph)).unwrap();
    assert!(ctx.wait_for_completion(Some(Duration::from_secs(10))));
    handle.wait().unwrap();

    assert_eq!(ctx.state(), ExecutionState::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

struct Sleeper(Duration);

impl NodeProcessor for Sleeper {
    fn process(&self, _ctx: &ProcessContext) -> etude::world::Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// slow -> after, where `slow` takes long enough to be stopped mid-run.
fn slow_graph(delay: Duration) -> Arc<WorldGraph> {
    let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
    let slow = WorldNode::custom(b.pool(), "slow", 0, 1, Arc::new(Sleeper(delay))).unwrap();
    let slow = b.add_node(slow).unwrap();
    let after = WorldNode::custom(b.pool(), "after", 1, 0, Arc::new(Sleeper(Duration::ZERO)))
        .unwrap();
    let after = b.add_node(after).unwrap();
    b.connect_nodes(slow, 0, after, 0).unwrap();
    b.build().unwrap()
}

#[test]
fn test_stop_cancels_async_run() {
    let ctx = test_context();
    let handle = ctx.execute_async(slow_graph(Duration::from_millis(200))).unwrap();
    assert!(wait_for(2000, || ctx.state() == ExecutionState::Running));

    ctx.stop().unwrap();
    assert_eq!(ctx.state(), ExecutionState::Idle);
    assert!(matches!(handle.wait(), Err(WorldError::Cancelled)));
    assert_eq!(ctx.state(), ExecutionState::Idle);
    assert_eq!(ctx.last_error(), None);
    assert_eq!(ctx.stats().nodes_executed, 1);

    // The context is usable again
    ctx.execute(&canonical_graph()).unwrap();
    assert_eq!(ctx.state(), ExecutionState::Completed);
}

#[test]
fn test_second_execute_rejected_while_busy() {
    let ctx = test_context();
    let graph = slow_graph(Duration::from_millis(100));
    let handle = ctx.execute_async(Arc::clone(&graph)).unwrap();

    assert!(matches!(ctx.execute(&graph), Err(WorldError::InvalidState(_))));
    assert!(matches!(
        ctx.execute_async(Arc::clone(&graph)),
        Err(WorldError::InvalidState(_))
    ));
    handle.wait().unwrap();
    assert_eq!(ctx.state(), ExecutionState::Completed);
}

#[test]
fn test_timeout_reports_error() {
    let ctx = test_context();
    let err = ctx
        .execute_with_timeout(&slow_graph(Duration::from_millis(50)), Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(err, WorldError::Timeout(_)));
    assert_eq!(ctx.state(), ExecutionState::Error);
    assert_eq!(ctx.last_error(), Some(ErrorCode::Timeout));

    assert!(matches!(
        ctx.execute_with_timeout(&canonical_graph(), Duration::ZERO),
        Err(WorldError::InvalidArgument(_))
    ));
}

struct FrameCounter;

impl NodeProcessor for FrameCounter {
    fn process(&self, ctx: &ProcessContext) -> etude::world::Result<()> {
        let frames = ctx.f0().map_or(0, |f0| f0.len());
        ctx.set_shared_data(0, Some(Arc::new(frames)))
    }
}

/// Custom nodes read upstream results and publish through shared data.
#[test]
fn test_custom_node_reads_upstream_results() {
    let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
    let input = b.add_default_node(NodeType::AudioInput).unwrap();
    let f0 = b.add_default_node(NodeType::F0Extraction).unwrap();
    let counter = WorldNode::custom(b.pool(), "frames", 1, 0, Arc::new(FrameCounter)).unwrap();
    let counter = b.add_node(counter).unwrap();
    b.connect_nodes(input, 0, f0, 0).unwrap();
    b.connect_nodes(f0, 0, counter, 0).unwrap();
    let graph = b.build().unwrap();

    let ctx = test_context();
    ctx.execute(&graph).unwrap();

    let frames = ctx.shared_data(0).unwrap().unwrap();
    assert_eq!(
        frames.downcast_ref::<usize>(),
        Some(&WorldParameters::frame_count(3200, TEST_SAMPLE_RATE, TEST_FRAME_PERIOD))
    );
}

#[test]
fn test_silent_input_renders_quietly() {
    let ctx = ExecutionContext::new(test_voice()).unwrap();
    ctx.set_input_audio(generate_silence(1600), TEST_SAMPLE_RATE).unwrap();
    ctx.execute(&canonical_graph()).unwrap();

    let world = ctx.world_parameters();
    assert!(world.f0.iter().all(|&hz| hz == 0.0));
    let output = ctx.output_audio().unwrap();
    assert!(peak(&output.samples) <= tolerances::SILENCE_THRESHOLD);
}

#[test]
fn test_reset_returns_to_fresh_state() {
    let ctx = test_context();
    ctx.execute(&canonical_graph()).unwrap();
    ctx.handle_error(ErrorCode::Runtime, "device lost");
    assert_eq!(ctx.state(), ExecutionState::Error);

    ctx.reset();
    assert_eq!(ctx.state(), ExecutionState::Idle);
    assert_eq!(ctx.progress(), 0.0);
    assert_eq!(ctx.last_error(), None);
    assert_eq!(ctx.stats(), ExecutionStats::default());
}
