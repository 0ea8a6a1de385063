//! Builder and execution configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity and behaviour of a [`GraphBuilder`](crate::GraphBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub max_nodes: usize,
    pub max_connections: usize,
    /// Bytes of the builder's node arena.
    pub memory_pool_size: usize,
    pub enable_optimization: bool,
    /// Run [`GraphBuilder::validate`](crate::GraphBuilder::validate) before building.
    pub enable_validation: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_nodes: 32,
            max_connections: 64,
            memory_pool_size: 1024 * 1024,
            enable_optimization: true,
            enable_validation: true,
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 || self.max_connections == 0 {
            return Err(Error::InvalidArgument(format!(
                "builder capacity {} nodes / {} connections must be non-zero",
                self.max_nodes, self.max_connections
            )));
        }
        if self.memory_pool_size == 0 {
            return Err(Error::InvalidArgument(
                "builder memory_pool_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Run-time configuration of an [`ExecutionContext`](crate::ExecutionContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub thread_count: usize,
    pub enable_profiling: bool,
    pub enable_caching: bool,
    pub enable_optimization: bool,
    /// Bytes of the context's run arena.
    pub memory_pool_size: usize,
    /// Applied by [`ExecutionContext::execute`](crate::ExecutionContext::execute) when set.
    pub timeout: Option<Duration>,
    pub shared_data_slots: usize,
    /// Analysis frame period in milliseconds.
    pub frame_period: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            thread_count: 4,
            enable_profiling: false,
            enable_caching: true,
            enable_optimization: true,
            memory_pool_size: 32 * 1024 * 1024,
            timeout: None,
            shared_data_slots: 16,
            frame_period: 5.0,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(Error::InvalidArgument("thread_count must be at least 1".into()));
        }
        if self.memory_pool_size == 0 {
            return Err(Error::InvalidArgument(
                "execution memory_pool_size must be non-zero".into(),
            ));
        }
        if !(self.frame_period > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "frame_period {} must be positive",
                self.frame_period
            )));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidArgument("timeout must be non-zero".into()));
        }
        Ok(())
    }
}
