//! Optimization integration tests
//!
//! Every optimized graph is built and executed afterwards: a pass that
//! leaves an unbuildable or differently-sounding graph is a failure even if
//! its statistics look right.

use crate::helpers::*;
use approx::assert_relative_eq;
use etude::prelude::*;
use etude::world::optimizer::{can_fuse, fusion_benefit};
use etude::world::Error as WorldError;

fn render(graph: &WorldGraph) -> Vec<f32> {
    let ctx = test_context();
    ctx.execute(graph).unwrap();
    assert_eq!(ctx.state(), ExecutionState::Completed);
    ctx.output_audio().unwrap().samples.to_vec()
}

/// input -> f0 ----------> synthesis -> output
///       -> spectrum ---/
///       -> spectrum (duplicate, dangling)
/// plus an isolated mapping node.
fn duplicated_analysis() -> GraphBuilder {
    let mut b = GraphBuilder::new(BuilderConfig::default()).unwrap();
    let input = b.add_default_node(NodeType::AudioInput).unwrap();
    let f0 = b.add_default_node(NodeType::F0Extraction).unwrap();
    let s1 = b.add_default_node(NodeType::SpectrumAnalysis).unwrap();
    let s2 = b.add_default_node(NodeType::SpectrumAnalysis).unwrap();
    let synth = b
        .add_node(WorldNode::synthesis(b.pool(), TEST_SAMPLE_RATE, TEST_FRAME_PERIOD).unwrap())
        .unwrap();
    let output = b.add_default_node(NodeType::AudioOutput).unwrap();
    b.add_default_node(NodeType::UtauMapping).unwrap();

    b.connect_nodes(input, 0, f0, 0).unwrap();
    b.connect_nodes(input, 0, s1, 0).unwrap();
    b.connect_nodes(input, 0, s2, 0).unwrap();
    b.connect_nodes(f0, 0, synth, 0).unwrap();
    b.connect_nodes(s1, 0, synth, 1).unwrap();
    b.connect_nodes(synth, 0, output, 0).unwrap();
    b
}

#[test]
fn test_fusion_scores() {
    assert_relative_eq!(
        fusion_benefit(NodeType::SpectrumAnalysis, NodeType::SpectrumAnalysis),
        0.9
    );
    assert_relative_eq!(
        fusion_benefit(NodeType::AperiodicityAnalysis, NodeType::AperiodicityAnalysis),
        0.5
    );
    assert_eq!(
        fusion_benefit(NodeType::SpectrumAnalysis, NodeType::AperiodicityAnalysis),
        0.0
    );
    for root in [NodeType::AudioInput, NodeType::AudioOutput] {
        assert!(!can_fuse(root, root));
        assert_eq!(fusion_benefit(root, root), 0.0);
    }
}

/// Optimizing the canonical chain changes the schedule, not the sound.
#[test]
fn test_canonical_optimization_preserves_output() {
    let reference = render(&canonical_graph());

    let (mut b, _) = canonical_builder();
    let report = GraphOptimizer::default().optimize(&mut b).unwrap();
    assert_eq!(report.stats.nodes_fused, 0);
    assert_eq!(report.stats.dead_nodes_removed, 0);
    assert_eq!(report.stats.parallel_sections_created, 7);
    assert!(report.stats.estimated_speedup >= 1.0);
    assert!(report.memory_plan.is_some());

    let graph = b.build().unwrap();
    assert_eq!(graph.node_count(), 8);
    assert_eq!(graph.parallel_plan().group_count(), 7);

    let optimized = render(&graph);
    assert_eq!(optimized.len(), reference.len());
    for (a, b) in optimized.iter().zip(&reference) {
        assert!((a - b).abs() <= tolerances::FLOAT_EPSILON);
    }
}

#[test]
fn test_duplicate_analysis_fused_and_dead_node_removed() {
    let mut b = duplicated_analysis();
    let report = GraphOptimizer::default().optimize(&mut b).unwrap();

    assert_eq!(report.stats.nodes_fused, 1);
    assert_eq!(report.fusions[0].fused_type, NodeType::SpectrumAnalysis);
    assert_eq!(report.stats.dead_nodes_removed, 1);
    assert_eq!(b.node_count(), 5);

    let fused = b.index_of(report.fusions[0].fused).unwrap();
    assert_eq!(b.get_node(fused).unwrap().fused_count(), 2);
    assert_eq!(count_of(&b, NodeType::UtauMapping), 0);

    let graph = b.build().unwrap();
    assert_has_audio(&render(&graph), tolerances::SILENCE_THRESHOLD);
}

#[test]
fn test_basic_level_never_restructures() {
    let mut b = duplicated_analysis();
    let report = GraphOptimizer::with_level(OptimizationLevel::Basic)
        .optimize(&mut b)
        .unwrap();
    assert_eq!(report.stats.nodes_fused, 0);
    assert!(report.fusions.is_empty());
    // Dead-node elimination is part of the basic set
    assert_eq!(report.stats.dead_nodes_removed, 1);
    assert_eq!(count_of(&b, NodeType::SpectrumAnalysis), 2);
}

#[test]
fn test_level_none_is_a_no_op() {
    let options = OptimizationOptions::for_level(OptimizationLevel::None);
    assert!(!options.any_enabled());

    let mut b = duplicated_analysis();
    let report = GraphOptimizer::new(options).unwrap().optimize(&mut b).unwrap();
    assert_eq!(report.stats.nodes_fused, 0);
    assert_eq!(report.stats.dead_nodes_removed, 0);
    assert!(report.parallel_plan.is_none());
    assert_eq!(b.node_count(), 7);
}

#[test]
fn test_thread_limit_bounds_group_width() {
    let options = OptimizationOptions {
        max_thread_count: 1,
        ..OptimizationOptions::for_level(OptimizationLevel::Basic)
    };
    let (mut b, _) = canonical_builder();
    let report = GraphOptimizer::new(options).unwrap().optimize(&mut b).unwrap();

    let plan = report.parallel_plan.unwrap();
    assert_eq!(plan.max_width(), 1);
    assert_eq!(plan.group_count(), 8);
    assert!(plan.is_valid(b.node_count(), b.connections()));

    let graph = b.build().unwrap();
    assert_eq!(graph.parallel_plan(), &plan);
}

#[test]
fn test_invalid_options_rejected() {
    let options = OptimizationOptions {
        memory_alignment: 24,
        ..Default::default()
    };
    assert!(matches!(
        GraphOptimizer::new(options),
        Err(WorldError::InvalidArgument(_))
    ));
}

fn count_of(b: &GraphBuilder, node_type: NodeType) -> usize {
    b.nodes().iter().filter(|n| n.node_type() == node_type).count()
}
