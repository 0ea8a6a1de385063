//! Error types for the WORLD processing graph.

use crate::connection::Connection;
use crate::node::NodeId;
use crate::port::PortType;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type for graph construction, optimization and execution.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("Input port already connected: {0}")]
    AlreadyExists(Connection),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A node is waiting for upstream results.
    #[error("Not ready: waiting for {0}")]
    NotReady(&'static str),

    #[error("Graph validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution timed out after {0:.3?}")]
    Timeout(Duration),

    #[error("Execution stopped")]
    Cancelled,

    /// Failure recorded through the execution context.
    #[error("Execution failed ({code}): {message}")]
    Execution { code: ErrorCode, message: String },

    #[error("Scheduler: {0}")]
    Scheduler(etude_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Stable code used by the execution context's error state.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::InvalidState(_) => ErrorCode::InvalidState,
            Error::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::NotReady(_) => ErrorCode::NotReady,
            Error::Validation(_) => ErrorCode::Validation,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Execution { code, .. } => *code,
            Error::Scheduler(_) => ErrorCode::Runtime,
            Error::Io(_) | Error::Wav(_) => ErrorCode::Io,
        }
    }
}

impl From<etude_core::Error> for Error {
    fn from(e: etude_core::Error) -> Self {
        match e {
            etude_core::Error::PoolExhausted {
                requested,
                available,
            } => Error::OutOfMemory {
                requested,
                available,
            },
            etude_core::Error::InvalidSize(_)
            | etude_core::Error::InvalidAlignment(_)
            | etude_core::Error::InvalidThreadCount(_) => Error::InvalidArgument(e.to_string()),
            other => Error::Scheduler(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes reported by the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidState,
    OutOfMemory,
    AlreadyExists,
    NotFound,
    NotReady,
    Validation,
    Timeout,
    Cancelled,
    Io,
    Runtime,
}

impl ErrorCode {
    /// Numeric form, negative like the rest of the engine's status codes.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::InvalidArgument => -1,
            ErrorCode::OutOfMemory => -2,
            ErrorCode::Io => -3,
            ErrorCode::InvalidState => -6,
            ErrorCode::NotFound => -7,
            ErrorCode::AlreadyExists => -8,
            ErrorCode::NotReady => -9,
            ErrorCode::Validation => -10,
            ErrorCode::Timeout => -11,
            ErrorCode::Cancelled => -12,
            ErrorCode::Runtime => -13,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::InvalidState => "invalid state",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::NotFound => "not found",
            ErrorCode::NotReady => "not ready",
            ErrorCode::Validation => "validation",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Io => "io",
            ErrorCode::Runtime => "runtime",
        };
        write!(f, "{} ({})", name, self.as_i32())
    }
}

/// The graph rule a validation pass rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cycle detected through node {node}")]
    Cycle { node: NodeId },

    #[error("node {node} is not connected to the rest of the graph")]
    Disconnected { node: NodeId },

    #[error("{source_type} output of node {src} cannot feed {dest_type} input of node {dst}")]
    IncompatiblePorts {
        src: NodeId,
        dst: NodeId,
        source_type: PortType,
        dest_type: PortType,
    },

    #[error("connection {connection} uses a port its nodes do not have")]
    InvalidPort { connection: Connection },
}
