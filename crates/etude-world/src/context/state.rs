//! Execution state machine.

use std::fmt;

/// Lifecycle of an [`ExecutionContext`](super::ExecutionContext).
///
/// ```text
/// Idle -> Initializing -> Running <-> Paused
///                            |
///                            v
///                        Completed
/// ```
///
/// Every state may fall into `Error`. A stop lands in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionState {
    #[default]
    Idle,
    Initializing,
    Running,
    Paused,
    Completed,
    Error,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Initializing => "initializing",
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::Completed => "completed",
            ExecutionState::Error => "error",
        }
    }

    /// A run owns the context in these states.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExecutionState::Initializing | ExecutionState::Running | ExecutionState::Paused
        )
    }

    /// States a user stop is accepted from.
    pub fn is_stoppable(self) -> bool {
        matches!(self, ExecutionState::Running | ExecutionState::Paused)
    }

    /// Whether a new run may start from this state.
    pub fn can_start(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (_, Error) => true,
            (Idle | Completed | Error, Initializing) => true,
            (Initializing, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Completed) => true,
            (Initializing | Running | Paused, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
