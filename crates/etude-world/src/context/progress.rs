//! Milestone progress reporting.
//!
//! A run walks a fixed list of milestones. Each node type maps to the
//! milestone reached just before it runs; milestones only move forward. The
//! user callback is throttled so that it fires at most once per interval.

use crate::node::NodeType;
use etude_core::AtomicProgress;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback receiving `(progress, stage label)`.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// Minimum spacing between two callback invocations.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// `(progress, label)` in the order a run reaches them.
pub const MILESTONES: [(f32, &str); 7] = [
    (0.0, "Starting execution"),
    (0.1, "F0 extraction"),
    (0.3, "Spectrum analysis"),
    (0.5, "Aperiodicity analysis"),
    (0.6, "Analysis complete"),
    (0.8, "Voice synthesis"),
    (1.0, "Synthesis complete"),
];

pub(crate) const LAST_MILESTONE: usize = MILESTONES.len() - 1;

/// Milestone reached when a node of `node_type` is about to run.
/// Custom nodes do not move progress.
pub fn stage_for(node_type: NodeType) -> Option<usize> {
    match node_type {
        NodeType::AudioInput => Some(0),
        NodeType::F0Extraction => Some(1),
        NodeType::SpectrumAnalysis => Some(2),
        NodeType::AperiodicityAnalysis => Some(3),
        NodeType::ParameterMerge | NodeType::UtauMapping => Some(4),
        NodeType::Synthesis | NodeType::AudioOutput => Some(5),
        NodeType::Custom => None,
    }
}

pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    interval: Duration,
    next: usize,
    last_emit: Option<Instant>,
    emitted: usize,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            next: 0,
            last_emit: None,
            emitted: 0,
        }
    }

    /// Advance through every milestone up to and including `stage`.
    pub(crate) fn reach(&mut self, stage: usize, progress: &AtomicProgress) {
        let stage = stage.min(LAST_MILESTONE);
        while self.next <= stage {
            let (value, label) = MILESTONES[self.next];
            progress.advance(value);
            self.emit(value, label);
            self.next += 1;
        }
    }

    /// Reach the final milestone.
    pub(crate) fn finish(&mut self, progress: &AtomicProgress) {
        self.reach(LAST_MILESTONE, progress);
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    fn emit(&mut self, value: f32, label: &str) {
        let Some(callback) = &self.callback else {
            return;
        };
        let now = Instant::now();
        if self
            .last_emit
            .is_some_and(|last| now.duration_since(last) < self.interval)
        {
            tracing::trace!(label, "progress throttled");
            return;
        }
        self.last_emit = Some(now);
        self.emitted += 1;
        callback(value, label);
    }
}
