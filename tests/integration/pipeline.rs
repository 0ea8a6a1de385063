//! VoicePipeline end-to-end tests

use crate::helpers::*;
use approx::assert_relative_eq;
use etude::prelude::*;
use etude::Error;

#[test]
fn test_default_pipeline_renders() {
    let pipeline = VoicePipeline::builder().voice(test_voice()).build().unwrap();
    assert!(matches!(pipeline.rendered(), Err(Error::NoOutput)));

    let input = generate_sine(220.0, TEST_SAMPLE_RATE, 4000);
    let rendered = pipeline.process(&input, TEST_SAMPLE_RATE).unwrap();

    assert_eq!(rendered.len(), input.len());
    assert_has_audio(&rendered, tolerances::SILENCE_THRESHOLD);
    assert!(peak(&rendered) <= 1.0);
    assert_eq!(pipeline.context().state(), ExecutionState::Completed);
    assert_eq!(pipeline.graph().node_count(), 8);

    let stats = pipeline.optimization_stats().unwrap();
    assert_eq!(stats.nodes_fused, 0);
    assert_eq!(stats.parallel_sections_created, 7);
}

#[test]
fn test_target_pitch_applied() {
    let voice = VoiceParameters {
        target_pitch: 330.0,
        ..test_voice()
    };
    let pipeline = VoicePipeline::builder().voice(voice).build().unwrap();
    pipeline
        .process(&generate_sine(220.0, TEST_SAMPLE_RATE, 4000), TEST_SAMPLE_RATE)
        .unwrap();

    let world = pipeline.context().world_parameters();
    let voiced: Vec<f64> = world.f0.iter().copied().filter(|&hz| hz > 0.0).collect();
    assert!(!voiced.is_empty());
    for hz in voiced {
        assert_relative_eq!(hz, 330.0, epsilon = 1e-9);
    }
}

#[test]
fn test_optimization_switches() {
    let off = VoicePipeline::builder()
        .voice(test_voice())
        .no_optimization()
        .build()
        .unwrap();
    assert!(off.optimization_stats().is_none());

    let voice = VoiceParameters {
        enable_optimization: false,
        enable_cache: false,
        ..test_voice()
    };
    let vetoed = VoicePipeline::builder()
        .voice(voice)
        .optimization_level(OptimizationLevel::Maximum)
        .build()
        .unwrap();
    assert!(vetoed.optimization_stats().is_none());
    assert!(!vetoed.context().is_caching_enabled());

    // Unoptimized and optimized pipelines sound the same
    let optimized = VoicePipeline::builder().voice(test_voice()).build().unwrap();
    let input = generate_noise(2000, 7);
    assert_eq!(
        off.process(&input, TEST_SAMPLE_RATE).unwrap(),
        optimized.process(&input, TEST_SAMPLE_RATE).unwrap()
    );
}

/// Rendering the same take twice reuses its analysis; a new take does not.
#[test]
fn test_repeated_input_reuses_analysis() {
    let pipeline = VoicePipeline::builder().voice(test_voice()).build().unwrap();
    let take = generate_sine(220.0, TEST_SAMPLE_RATE, 3200);

    let first = pipeline.process(&take, TEST_SAMPLE_RATE).unwrap();
    assert_eq!(pipeline.context().stats().cache_hits, 0);

    let second = pipeline.process(&take, TEST_SAMPLE_RATE).unwrap();
    let stats = pipeline.context().stats();
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.nodes_executed, 5);
    assert_eq!(second, first);

    pipeline
        .process(&generate_sine(330.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .unwrap();
    assert_eq!(pipeline.context().stats().cache_hits, 0);

    let voice = VoiceParameters {
        enable_cache: false,
        ..test_voice()
    };
    let uncached = VoicePipeline::builder().voice(voice).build().unwrap();
    uncached.process(&take, TEST_SAMPLE_RATE).unwrap();
    uncached.process(&take, TEST_SAMPLE_RATE).unwrap();
    assert_eq!(uncached.context().stats().cache_hits, 0);
}

#[test]
fn test_invalid_voice_rejected() {
    let voice = VoiceParameters {
        volume: 1.5,
        ..test_voice()
    };
    let err = VoicePipeline::builder().voice(voice).build().unwrap_err();
    assert!(matches!(
        err.as_world(),
        Some(etude::world::Error::InvalidArgument(_))
    ));
}

#[test]
fn test_wav_written_to_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.wav");
    let voice = VoiceParameters {
        output_path: Some(path.clone()),
        ..test_voice()
    };
    let pipeline = VoicePipeline::builder().voice(voice).build().unwrap();
    let rendered = pipeline
        .process(&generate_sine(220.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| f32::from(s.unwrap()) / 32767.0)
        .collect();
    assert_eq!(samples.len(), rendered.len());
    for (written, expected) in samples.iter().zip(&rendered) {
        assert!((written - expected).abs() <= 2.0 * tolerances::INT16_EPSILON);
    }
}

#[test]
fn test_async_processing() {
    let pipeline = VoicePipeline::builder().voice(test_voice()).build().unwrap();
    let handle = pipeline
        .process_async(&generate_sine(220.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .unwrap();
    handle.wait().unwrap();

    let buffer = pipeline.rendered().unwrap();
    assert_eq!(buffer.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(buffer.samples.len(), 3200);
}

#[test]
fn test_pipeline_from_diagram() {
    let mut diagram = BlockDiagram::new("analysis_only", 8, 8).unwrap();
    let input = diagram
        .add_block(Block::typed("mic", NodeType::AudioInput))
        .unwrap();
    let f0 = diagram
        .add_block(Block::typed("pitch", NodeType::F0Extraction))
        .unwrap();
    let spectrum = diagram
        .add_block(Block::typed("envelope", NodeType::SpectrumAnalysis))
        .unwrap();
    let synth = diagram
        .add_block(
            Block::typed("voice", NodeType::Synthesis)
                .with_param("sample_rate", f64::from(TEST_SAMPLE_RATE)),
        )
        .unwrap();
    let output = diagram
        .add_block(Block::typed("out", NodeType::AudioOutput))
        .unwrap();
    diagram.connect(input, 0, f0, 0).unwrap();
    diagram.connect(input, 0, spectrum, 0).unwrap();
    diagram.connect(f0, 0, synth, 0).unwrap();
    diagram.connect(spectrum, 0, synth, 1).unwrap();
    diagram.connect(synth, 0, output, 0).unwrap();

    let pipeline = VoicePipeline::builder()
        .voice(test_voice())
        .diagram(diagram, ClassificationPolicy::ExplicitType)
        .build()
        .unwrap();
    assert_eq!(pipeline.graph().node_count(), 5);

    let rendered = pipeline
        .process(&generate_sine(220.0, TEST_SAMPLE_RATE, 3200), TEST_SAMPLE_RATE)
        .unwrap();
    assert_has_audio(&rendered, tolerances::SILENCE_THRESHOLD);
}
