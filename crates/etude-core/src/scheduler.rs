//! Work-group scheduler.
//!
//! A group is a set of work items with no data dependency on each other.
//! [`TaskScheduler::run_group`] fans the items out over scoped worker threads
//! and returns once every item has finished or one of them failed. A
//! panicking item fails its group with [`Error::WorkerPanicked`], whether it
//! ran on a worker or inline.

use crate::compat::Mutex;
use crate::lockfree::AtomicFlag;
use crate::Error;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// One unit of work. Borrowing from the caller's stack is allowed.
pub type WorkItem<'a, E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'a>;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME: &str = "etude-worker";

#[derive(Debug, Clone)]
pub struct TaskScheduler {
    thread_count: usize,
    thread_name: String,
}

impl TaskScheduler {
    pub fn new(thread_count: usize) -> crate::Result<Self> {
        if thread_count == 0 {
            return Err(Error::InvalidThreadCount(thread_count));
        }
        Ok(Self {
            thread_count,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        })
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn set_thread_count(&mut self, thread_count: usize) -> crate::Result<()> {
        if thread_count == 0 {
            return Err(Error::InvalidThreadCount(thread_count));
        }
        self.thread_count = thread_count;
        Ok(())
    }

    /// Run every item of one group.
    ///
    /// Items run inline when the group has one item or the scheduler has one
    /// thread. After the first failure, items that have not started yet are
    /// skipped and the first error is returned.
    pub fn run_group<'a, E>(&self, items: Vec<WorkItem<'a, E>>) -> Result<(), E>
    where
        E: From<Error> + Send,
    {
        let workers = self.thread_count.min(items.len());
        if workers <= 1 {
            return items.into_iter().try_for_each(run_item);
        }

        tracing::trace!(items = items.len(), workers, "running work group");

        let (tx, rx) = crossbeam_channel::bounded::<WorkItem<'a, E>>(items.len());
        for item in items {
            tx.send(item).map_err(|_| E::from(Error::QueueClosed))?;
        }
        drop(tx);

        let failed = AtomicFlag::new(false);
        let first_error: Mutex<Option<E>> = Mutex::new(None);
        let mut scheduler_error = None;

        let drain = |rx: &crossbeam_channel::Receiver<WorkItem<'a, E>>| {
            while let Ok(item) = rx.recv() {
                if failed.get() {
                    continue;
                }
                if let Err(e) = run_item(item) {
                    if !failed.swap(true) {
                        *first_error.lock() = Some(e);
                    }
                }
            }
        };

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for index in 0..workers {
                let rx = rx.clone();
                let drain = &drain;
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", self.thread_name, index))
                    .spawn_scoped(scope, move || drain(&rx));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        tracing::warn!("failed to spawn worker {index}: {e}");
                        scheduler_error.get_or_insert(Error::Spawn(e.to_string()));
                    }
                }
            }

            // Whatever no worker picked up runs here.
            drain(&rx);

            for handle in handles {
                if handle.join().is_err() {
                    scheduler_error = Some(Error::WorkerPanicked);
                }
            }
        });

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        match scheduler_error {
            Some(Error::WorkerPanicked) => Err(E::from(Error::WorkerPanicked)),
            _ => Ok(()),
        }
    }
}

fn run_item<E: From<Error>>(item: WorkItem<'_, E>) -> Result<(), E> {
    match panic::catch_unwind(AssertUnwindSafe(item)) {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!("work item panicked");
            Err(E::from(Error::WorkerPanicked))
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self {
            thread_count: 1,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}
