//! Centralized error type for the etude umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] etude_core::Error),

    #[error(transparent)]
    World(#[from] etude_world::Error),

    #[error("Pipeline produced no audio")]
    NoOutput,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The graph-level error, if this is one.
    pub fn as_world(&self) -> Option<&etude_world::Error> {
        match self {
            Error::World(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
