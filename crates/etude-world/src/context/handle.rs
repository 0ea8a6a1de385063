//! Handle to a background execution.

use crate::{Error, Result};
use std::thread::JoinHandle;

/// Returned by [`ExecutionContext::execute_async`](super::ExecutionContext::execute_async).
///
/// Dropping the handle detaches the run; it still finishes and still calls
/// the completion callback.
#[derive(Debug)]
pub struct ExecutionHandle {
    thread: Option<JoinHandle<Result<()>>>,
}

impl ExecutionHandle {
    pub(crate) fn new(thread: JoinHandle<Result<()>>) -> Self {
        Self {
            thread: Some(thread),
        }
    }

    /// Block until the run finishes and return its outcome.
    pub fn wait(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::InvalidState("execution thread panicked".into()))?,
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}
