//! Graph construction integration tests
//!
//! Exercises the builder on the full WORLD chain and on converted block
//! diagrams, then runs the result to make sure what was built is executable.

use crate::helpers::*;
use etude::prelude::*;
use etude::world::{classify_block, Error as WorldError, NodeKey, ValidationError};
use proptest::prelude::*;
use std::sync::Arc;

/// The canonical chain schedules as seven stages with the two
/// f0-dependent analyses side by side.
#[test]
fn test_canonical_graph_schedule() {
    let (mut b, ids) = canonical_builder();
    assert_eq!(b.node_count(), 8);
    assert_eq!(b.connection_count(), 13);
    b.validate().unwrap();

    let graph = b.build().unwrap();
    let order = graph.topological_order();
    assert_eq!(order.first(), Some(&ids.input));
    assert_eq!(order.last(), Some(&ids.output));

    let plan = graph.parallel_plan();
    assert_eq!(plan.group_count(), 7);
    assert_eq!(plan.max_width(), 2);
    assert_eq!(graph.nodes_of_type(NodeType::SpectrumAnalysis), vec![ids.spectrum]);
}

#[test]
fn test_connect_and_duplicate_rejection() {
    let (mut b, ids) = canonical_builder();
    assert!(b.has_connection(ids.f0, 0, ids.merge, 0));
    assert!(!b.has_connection(ids.merge, 0, ids.f0, 0));

    // Same endpoints again
    let err = b.connect_nodes(ids.f0, 0, ids.merge, 0).unwrap_err();
    assert!(matches!(err, WorldError::AlreadyExists(_)));

    // A second producer on an occupied input port
    let err = b.connect_nodes(ids.spectrum, 0, ids.merge, 0).unwrap_err();
    assert!(matches!(err, WorldError::AlreadyExists(c) if c.source == ids.f0));
    assert_eq!(b.connection_count(), 13);

    b.disconnect_nodes(ids.f0, 0, ids.merge, 0).unwrap();
    assert!(!b.has_connection(ids.f0, 0, ids.merge, 0));
    assert!(b.is_valid_connection(ids.f0, 0, ids.merge, 0));
}

/// Building twice hands back the same graph, and a built builder refuses
/// every mutation without changing its counts.
#[test]
fn test_built_builder_is_frozen() {
    let (mut b, ids) = canonical_builder();
    let first = b.build().unwrap();
    let second = b.build().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(b.is_built());

    let (nodes, connections) = (b.node_count(), b.connection_count());
    assert!(matches!(
        b.add_default_node(NodeType::Synthesis),
        Err(WorldError::InvalidState(_))
    ));
    assert!(matches!(
        b.disconnect_nodes(ids.synthesis, 0, ids.output, 0),
        Err(WorldError::InvalidState(_))
    ));
    assert!(matches!(b.remove_node(ids.utau), Err(WorldError::InvalidState(_))));
    assert!(matches!(
        GraphOptimizer::default().optimize(&mut b),
        Err(WorldError::InvalidState(_))
    ));
    assert_eq!(b.node_count(), nodes);
    assert_eq!(b.connection_count(), connections);

    let rebuilt = b.rebuild().unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
}

/// Removing a node moves the last node into its slot; keys follow the move.
#[test]
fn test_remove_node_moves_last_into_slot() {
    let (mut b, ids) = canonical_builder();
    let output_key = b.key_of(ids.output).unwrap();

    let removed = b.remove_node(ids.f0).unwrap();
    assert_eq!(removed.node_type(), NodeType::F0Extraction);
    assert_eq!(b.node_count(), 7);
    // input->f0, f0->spectrum, f0->aperiodicity, f0->merge
    assert_eq!(b.connection_count(), 9);

    assert_eq!(b.index_of(output_key), Some(ids.f0));
    assert_eq!(b.get_node(ids.f0).unwrap().node_type(), NodeType::AudioOutput);
    assert!(b.has_connection(ids.synthesis, 0, ids.f0, 0));
    assert!(b.connections().iter().all(|c| c.source < 7 && c.dest < 7));
}

#[test]
fn test_incompatible_ports_fail_validation() {
    let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
    let input = b.add_default_node(NodeType::AudioInput).unwrap();
    let merge = b.add_default_node(NodeType::ParameterMerge).unwrap();

    // Audio into the spectrum input
    assert!(!b.is_valid_connection(input, 0, merge, 1));
    b.connect_nodes(input, 0, merge, 1).unwrap();

    let err = b.build().unwrap_err();
    assert!(matches!(
        err,
        WorldError::Validation(ValidationError::IncompatiblePorts { .. })
    ));
    assert!(!b.is_built());
}

#[test]
fn test_unvalidated_build_skips_checks() {
    let config = BuilderConfig {
        enable_validation: false,
        ..Default::default()
    };
    let mut b = GraphBuilder::new(config).unwrap();
    b.add_default_node(NodeType::AudioInput).unwrap();
    b.add_default_node(NodeType::AudioOutput).unwrap();
    assert!(b.validate().is_err());
    assert_eq!(b.build().unwrap().node_count(), 2);
}

fn voice_diagram() -> BlockDiagram {
    let mut d = BlockDiagram::new("voice", 16, 16).unwrap();
    let input = d.add_block(Block::new("voice_in", 0, 1)).unwrap();
    let f0 = d.add_block(Block::new("f0_extraction", 1, 1)).unwrap();
    let spectrum = d.add_block(Block::new("spectrum_analysis", 2, 1)).unwrap();
    let synth = d
        .add_block(
            Block::new("synthesis", 3, 1).with_param("sample_rate", f64::from(TEST_SAMPLE_RATE)),
        )
        .unwrap();
    let output = d.add_block(Block::new("audio_output", 1, 0)).unwrap();
    let mut preview = Block::new("audio_output_preview", 1, 0);
    preview.set_enabled(false);
    let preview = d.add_block(preview).unwrap();

    d.connect(input, 0, f0, 0).unwrap();
    d.connect(input, 0, spectrum, 0).unwrap();
    d.connect(f0, 0, synth, 0).unwrap();
    d.connect(spectrum, 0, synth, 1).unwrap();
    d.connect(synth, 0, output, 0).unwrap();
    d.connect(synth, 0, preview, 0).unwrap();
    d
}

/// A converted diagram drops disabled blocks and runs like a hand-built graph.
#[test]
fn test_diagram_conversion_runs() {
    let diagram = voice_diagram();
    diagram.validate().unwrap();

    let mut b = GraphBuilder::from_diagram(&diagram).unwrap();
    assert_eq!(b.source_diagram(), Some("voice"));
    assert_eq!(b.node_count(), 5);
    assert_eq!(b.connection_count(), 5);
    assert_eq!(b.nodes()[0].node_type(), NodeType::AudioInput);
    assert_eq!(b.nodes()[0].name(), "voice_in");

    let graph = b.build().unwrap();
    let ctx = test_context();
    ctx.execute(&graph).unwrap();
    assert_eq!(ctx.state(), ExecutionState::Completed);

    let output = ctx.output_audio().unwrap();
    assert_eq!(output.sample_rate, TEST_SAMPLE_RATE);
    assert_has_audio(&output.samples, tolerances::SILENCE_THRESHOLD);
}

#[test]
fn test_classification_policies() {
    let pitch = Block::typed("pitch", NodeType::F0Extraction);
    assert_eq!(
        classify_block(&pitch, ClassificationPolicy::ExplicitType),
        NodeType::F0Extraction
    );
    assert_eq!(
        classify_block(&pitch, ClassificationPolicy::NameSubstring),
        NodeType::AudioInput
    );

    // Name patterns are checked in order: "synthesis" before "audio_output".
    let both = Block::new("synthesis_to_audio_output", 1, 1);
    assert_eq!(
        classify_block(&both, ClassificationPolicy::NameSubstring),
        NodeType::Synthesis
    );
}

proptest! {
    /// Keys keep naming the same node through any sequence of removals.
    #[test]
    fn test_keys_survive_removals(picks in prop::collection::vec(0usize..8, 1..8)) {
        let (mut b, _) = canonical_builder();
        let mut live: Vec<(NodeKey, NodeType)> = (0..b.node_count())
            .map(|id| (b.key_of(id).unwrap(), b.nodes()[id].node_type()))
            .collect();

        for pick in picks {
            if b.node_count() == 0 {
                break;
            }
            let id = pick % b.node_count();
            let key = b.key_of(id).unwrap();
            b.remove_node(id).unwrap();
            live.retain(|(k, _)| *k != key);

            prop_assert_eq!(b.node_count(), live.len());
            prop_assert_eq!(b.index_of(key), None);
            for &(k, node_type) in &live {
                let id = b.index_of(k).unwrap();
                prop_assert_eq!(b.key_of(id), Some(k));
                prop_assert_eq!(b.nodes()[id].node_type(), node_type);
            }
            let count = b.node_count();
            prop_assert!(b.connections().iter().all(|c| c.source < count && c.dest < count));
        }
    }
}
