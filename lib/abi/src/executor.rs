//! Thin wrappers over `depexec::Executor` and `PauseTable`: submitting a
//! task body to the worker pool, and the park/wake pair a blocked
//! `taskwait` caller uses to give up its OS thread until its last child
//! reports done.

use std::ffi::c_void;

use depcore::TaskId;

use crate::runtime;

pub type TaskBodyFn = extern "C" fn(*mut c_void);

/// A raw pointer handed across the ABI as a task body's single argument.
/// Submitted jobs only move this pointer across a thread boundary without
/// dereferencing it themselves; the callee on the other side is
/// responsible for whatever synchronization its own payload needs.
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}

/// Submits `function(argument)` to the executor's worker pool. Returns
/// `true` on success, `false` if the pool has already been shut down.
#[no_mangle]
pub extern "C" fn executor_submit(function: TaskBodyFn, argument: *mut c_void) -> bool {
    let rt = runtime::get();
    let argument = SendPtr(argument);
    rt.executor
        .submit(Box::new(move || {
            let argument = argument;
            let SendPtr(ptr) = argument;
            function(ptr);
        }))
        .is_ok()
}

/// Blocks the calling OS thread until `executor_wake` is called for the
/// same raw task id (as returned by `task_id`). Used after `task_taskwait`
/// reports `true`.
#[no_mangle]
pub extern "C" fn executor_park_current(raw_task_id: u64) {
    runtime::get().pause_table.park(TaskId::from_raw(raw_task_id));
}

/// Wakes a thread parked in `executor_park_current` for the same id. Safe
/// to call even if the matching park has not happened yet, and safe to
/// call even if no thread ever parks for this id.
#[no_mangle]
pub extern "C" fn executor_wake(raw_task_id: u64) {
    runtime::get().pause_table.wake(TaskId::from_raw(raw_task_id));
}

/// Blocks until every in-flight and queued job finishes, then stops
/// accepting new work. Consumes the process-wide executor; only call this
/// once, at shutdown.
#[no_mangle]
pub extern "C" fn executor_worker_count() -> usize {
    runtime::get().executor.worker_count()
}
