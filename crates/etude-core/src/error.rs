//! Error types for etude-core.

use thiserror::Error;

/// Error type for etude-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Memory pool exhausted: requested {requested} bytes, {available} available")]
    PoolExhausted { requested: usize, available: usize },

    #[error("Invalid allocation size: {0}")]
    InvalidSize(usize),

    #[error("Invalid alignment: {0}. Must be a power of two")]
    InvalidAlignment(usize),

    #[error("Invalid thread count: {0}. Must be at least 1")]
    InvalidThreadCount(usize),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Work queue closed before all items were queued")]
    QueueClosed,
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
