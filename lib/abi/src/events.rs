//! Event counters: trivial wrappers that treat a task handle as an opaque
//! pointer and forward straight to its `release_count`, matching the
//! reference's `EventsAPI.cpp`. A task's dependencies do not release until
//! its event counter, like its body, has fully drained.

use crate::task::TaskHandle;

/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn current_event_counter_increment(task: TaskHandle, amount: u32) {
    let task = unsafe { &*task };
    task.increase_release_count(amount as i64);
}

/// Returns whether this was the decrement that drained the counter to
/// zero, i.e. whether the caller should now proceed with the task's
/// finalization (the reference's event path, where the last decrement
/// triggers the same `finalize` step a plain task body completing would).
///
/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn current_event_counter_decrement(task: TaskHandle, amount: u32) -> bool {
    let task = unsafe { &*task };
    task.decrease_release_count(amount as i64)
}
