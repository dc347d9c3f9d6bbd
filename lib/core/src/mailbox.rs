//! Worker-local deferred queue of tasks that became ready or disposable
//! while another task's registration or finalization was being processed.
//!
//! The reference runtime drains this queue before returning control to
//! user code so that satisfying one task's dependency does not re-enter
//! the dependency system recursively from deep inside another task's
//! finalize call. Here [`crate::system::DependencySystem`] fills the
//! mailbox during `register`/`finalize`/`taskwait` and drains it itself
//! at the end of each public call, which gives callers the same
//! non-reentrant guarantee without requiring a literal per-OS-thread
//! instance.

use crate::task::TaskId;

#[derive(Default)]
pub struct Mailbox {
    pub ready: Vec<TaskId>,
    pub deletable: Vec<TaskId>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_ready(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.ready)
    }

    pub fn drain_deletable(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.deletable)
    }
}
