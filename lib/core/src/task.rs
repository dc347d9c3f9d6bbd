//! Per-task lifecycle state: the counters that decide when a task may run,
//! when it may be woken from a taskwait, and when it may be destroyed.
//!
//! Mirrors the reference runtime's `TaskMetadata` counters: `predecessor_count`,
//! `removal_count` (child references plus one for attached dependencies),
//! `children_countdown` (here `countdown_to_be_woken_up`), and `release_count`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::access_map::AccessMap;
use crate::bottom_map::BottomMap;

/// Opaque task identifier, handed out by [`crate::system::DependencySystem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value, exposed so collaborators outside this crate
    /// (the executor's pause table, the ABI's task handles) can use it as
    /// a stable key without being able to construct a `TaskId` themselves.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstructs a `TaskId` from a value previously obtained from
    /// `raw()`. Only meaningful for a value that really did come from
    /// `raw()` on a live task; round-tripping an id across the ABI
    /// boundary (`task_id` / `executor_park_current` / `executor_wake`) is
    /// the only sanctioned use.
    pub fn from_raw(value: u64) -> Self {
        TaskId(value)
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        const FINAL      = 1 << 0;
        const IF0        = 1 << 1;
        const TASKLOOP   = 1 << 2;
        const WAIT       = 1 << 3;
        const SPAWNED    = 1 << 4;
        const MAIN       = 1 << 5;
    }
}

/// A task's nested-task chaining state and lifecycle counters.
///
/// The task's own declared accesses live in `access_map`; its children's
/// accesses are chained through `bottom_map`, which only the task's own
/// worker ever mutates (while it is registering children, running its own
/// taskwait, or finalizing).
pub struct TaskNode {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    pub flags: TaskFlags,

    /// Unsatisfied incoming edges. Runnable once this hits zero.
    predecessor_count: AtomicI64,
    /// Live children, plus one for "dependencies still attached".
    removal_count: AtomicI64,
    /// Live children not yet finished, plus one for "not blocked".
    children_countdown: AtomicI64,
    /// Pending events/body-completion before dependencies release.
    release_count: AtomicI64,

    pub access_map: Mutex<AccessMap>,
    pub(crate) bottom_map: Mutex<BottomMap>,

    finished: AtomicBool,
    /// Set the instant the executor begins running the body; used by
    /// scenario probes (`has_started`/`has_finished`).
    started: AtomicBool,
}

impl TaskNode {
    pub fn new(parent: Option<TaskId>, flags: TaskFlags) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            parent,
            flags,
            predecessor_count: AtomicI64::new(0),
            removal_count: AtomicI64::new(1),
            children_countdown: AtomicI64::new(1),
            release_count: AtomicI64::new(1),
            access_map: Mutex::new(AccessMap::new()),
            bottom_map: Mutex::new(BottomMap::new()),
            finished: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn is_final(&self) -> bool {
        self.flags.contains(TaskFlags::FINAL)
    }

    pub fn is_if0(&self) -> bool {
        self.flags.contains(TaskFlags::IF0)
    }

    pub fn must_delay_release(&self) -> bool {
        self.flags.contains(TaskFlags::WAIT)
    }

    pub fn is_taskloop_source(&self) -> bool {
        self.flags.contains(TaskFlags::TASKLOOP)
    }

    pub fn increase_predecessors(&self, amount: i64) {
        self.predecessor_count.fetch_add(amount, Ordering::Relaxed);
    }

    /// Returns whether the task becomes runnable as a result.
    pub fn decrease_predecessors(&self, amount: i64) -> bool {
        let res = self.predecessor_count.fetch_sub(amount, Ordering::AcqRel) - amount;
        debug_assert!(res >= 0);
        res == 0
    }

    pub fn predecessor_count(&self) -> i64 {
        self.predecessor_count.load(Ordering::Acquire)
    }

    pub fn increase_removal_blocking_count(&self) {
        self.removal_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns whether the task is now disposable.
    pub fn decrease_removal_blocking_count(&self) -> bool {
        let prev = self.removal_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1);
        prev - 1 == 0
    }

    pub fn does_not_need_to_block_for_children(&self) -> bool {
        self.removal_count.load(Ordering::Acquire) == 1
    }

    /// Register a nested task: bumps both `children_countdown` and
    /// `removal_count`, matching `TaskMetadata::addChild`.
    pub fn add_child(&self) {
        self.children_countdown.fetch_add(1, Ordering::Relaxed);
        self.removal_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A child finished. Returns whether this unblocks a taskwait.
    pub fn finish_child(&self) -> bool {
        let prev = self.children_countdown.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1);
        prev - 1 == 0
    }

    pub fn children_countdown(&self) -> i64 {
        self.children_countdown.load(Ordering::Acquire)
    }

    /// Atomically decrements and returns whether the result is zero,
    /// matching the taskwait entry step.
    pub fn decrement_children_countdown(&self) -> bool {
        let prev = self.children_countdown.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 0);
        prev - 1 == 0
    }

    /// Restores the "not blocked" credit consumed by the taskwait entry
    /// decrement above, once the task is cleared to proceed past it
    /// (immediately on a `Ready` outcome, or later on resuming from a
    /// pause). Without this, a task that calls `taskwait` more than once
    /// (e.g. in a loop that adds more children between waits) would
    /// decrement from zero on its second call and park forever.
    pub fn restore_taskwait_credit(&self) {
        self.children_countdown.fetch_add(1, Ordering::Release);
    }

    pub fn increase_release_count(&self, amount: i64) {
        self.release_count.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn decrease_release_count(&self, amount: i64) -> bool {
        let prev = self.release_count.fetch_sub(amount, Ordering::AcqRel);
        debug_assert!(prev - amount >= 0);
        prev - amount == 0
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn has_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("predecessor_count", &self.predecessor_count())
            .field("removal_count", &self.removal_count.load(Ordering::Relaxed))
            .finish()
    }
}
