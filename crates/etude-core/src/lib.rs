//! Runtime kernel shared by the Etude subsystems.
//!
//! # Primary API
//!
//! - [`MemoryPool`]: arena-style byte budget with all-or-nothing multi-region reservation
//! - [`TaskScheduler`]: runs a group of independent work items on scoped worker threads
//! - [`CancellationToken`]: cooperative stop/pause/deadline observed at checkpoints
//! - [`AtomicFlag`], [`AtomicProgress`], [`AtomicSeconds`]: lock-free shared state
//!
//! # Example
//!
//! ```ignore
//! use etude_core::{MemoryPool, TaskScheduler, WorkItem};
//!
//! let pool = MemoryPool::new(1 << 20)?;
//! let regions = pool.alloc_many(&[4096, 512])?;
//!
//! let scheduler = TaskScheduler::new(4)?;
//! let items: Vec<WorkItem<'_, etude_core::Error>> = vec![Box::new(|| Ok(()))];
//! scheduler.run_group(items)?;
//! ```

pub mod error;
pub use error::{Error, Result};

/// Synchronization and collection types used across the workspace.
pub mod compat;

mod cancel;
pub use cancel::{CancellationToken, Checkpoint};

mod lockfree;
pub use lockfree::{AtomicFlag, AtomicProgress, AtomicSeconds};

mod pool;
pub use pool::{Allocation, MemoryPool, DEFAULT_ALIGNMENT};

mod scheduler;
pub use scheduler::{TaskScheduler, WorkItem, DEFAULT_THREAD_NAME};
