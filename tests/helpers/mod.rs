//! Test helpers and fixtures for Etude integration tests
//!
//! Signals are generated in memory at a low sample rate so every run of the
//! reference vocoder stays fast.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): values that should come back unchanged
//! - `SILENCE_THRESHOLD` (0.0001): silence detection (-80dB)
//! - `INT16_EPSILON`: one 16-bit quantization step

pub mod tolerances;

use etude::prelude::*;
use etude::world::node::{DEFAULT_F0_CEIL, DEFAULT_F0_FLOOR};
use etude::world::NodeId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sample rate used by every fixture.
pub const TEST_SAMPLE_RATE: u32 = 16_000;

/// Frame period of the fixtures, in milliseconds.
pub const TEST_FRAME_PERIOD: f64 = 5.0;

/// Voice parameters rendering at [`TEST_SAMPLE_RATE`] with the analysed pitch kept.
pub fn test_voice() -> VoiceParameters {
    VoiceParameters {
        sample_rate: TEST_SAMPLE_RATE,
        target_pitch: 0.0,
        ..Default::default()
    }
}

/// Execution context with a 220 Hz tone already loaded.
pub fn test_context() -> ExecutionContext {
    let ctx = ExecutionContext::new(test_voice()).expect("Failed to create test context");
    ctx.set_input_audio(generate_sine(220.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .expect("Failed to load input audio");
    ctx
}

/// Node ids of [`canonical_builder`], in insertion order.
pub struct CanonicalIds {
    pub input: NodeId,
    pub f0: NodeId,
    pub spectrum: NodeId,
    pub aperiodicity: NodeId,
    pub merge: NodeId,
    pub utau: NodeId,
    pub synthesis: NodeId,
    pub output: NodeId,
}

/// The full WORLD chain, unbuilt:
///
/// ```text
/// input -> f0 ------------+-> merge -> utau -> synthesis -> output
///       -> spectrum ------+                 /
///       -> aperiodicity --+----------------
/// ```
pub fn canonical_builder() -> (GraphBuilder, CanonicalIds) {
    let mut b = GraphBuilder::new(BuilderConfig::default()).expect("Failed to create builder");
    let f0_node =
        WorldNode::f0_extraction(b.pool(), TEST_FRAME_PERIOD, DEFAULT_F0_FLOOR, DEFAULT_F0_CEIL)
            .unwrap();
    let synth_node = WorldNode::synthesis(b.pool(), TEST_SAMPLE_RATE, TEST_FRAME_PERIOD).unwrap();

    let ids = CanonicalIds {
        input: b.add_default_node(NodeType::AudioInput).unwrap(),
        f0: b.add_node(f0_node).unwrap(),
        spectrum: b.add_default_node(NodeType::SpectrumAnalysis).unwrap(),
        aperiodicity: b.add_default_node(NodeType::AperiodicityAnalysis).unwrap(),
        merge: b.add_default_node(NodeType::ParameterMerge).unwrap(),
        utau: b.add_default_node(NodeType::UtauMapping).unwrap(),
        synthesis: b.add_node(synth_node).unwrap(),
        output: b.add_default_node(NodeType::AudioOutput).unwrap(),
    };

    for (source, dest, port) in [
        (ids.input, ids.f0, 0),
        (ids.input, ids.spectrum, 0),
        (ids.input, ids.aperiodicity, 0),
        (ids.f0, ids.spectrum, 1),
        (ids.f0, ids.aperiodicity, 1),
        (ids.f0, ids.merge, 0),
        (ids.spectrum, ids.merge, 1),
        (ids.aperiodicity, ids.merge, 2),
        (ids.merge, ids.utau, 0),
        (ids.utau, ids.synthesis, 0),
        (ids.spectrum, ids.synthesis, 1),
        (ids.aperiodicity, ids.synthesis, 2),
        (ids.synthesis, ids.output, 0),
    ] {
        b.connect_nodes(source, 0, dest, port).unwrap();
    }
    (b, ids)
}

/// [`canonical_builder`], built.
pub fn canonical_graph() -> Arc<WorldGraph> {
    let (mut b, _) = canonical_builder();
    b.build().expect("Failed to build canonical graph")
}

/// Generate a test signal: half-amplitude sine wave at given frequency.
pub fn generate_sine(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5
        })
        .collect()
}

/// Generate silence (zero samples).
pub fn generate_silence(num_samples: usize) -> Vec<f32> {
    vec![0.0; num_samples]
}

/// Generate white noise (random samples in -1..1).
pub fn generate_noise(num_samples: usize, seed: u64) -> Vec<f32> {
    // Simple LCG for reproducible "random" noise
    let mut rng = seed;
    (0..num_samples)
        .map(|_| {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((rng >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal has content (not silent) and no NaN/inf samples.
pub fn assert_has_audio(samples: &[f32], min_rms: f32) {
    assert!(
        samples.iter().all(|s| s.is_finite()),
        "Signal contains non-finite samples"
    );
    let r = rms(samples);
    assert!(
        r >= min_rms,
        "Expected audio content with RMS >= {}, but RMS was {}",
        min_rms,
        r
    );
}

/// Poll `condition` every millisecond until it holds or `max_wait_ms` passes.
pub fn wait_for(max_wait_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    let timeout = Duration::from_millis(max_wait_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
