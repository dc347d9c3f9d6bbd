//! Generic blocking primitives, independent of `taskwait`'s child-countdown
//! machinery: a task can block itself on an arbitrary external event (a
//! polling service, an I/O completion) and be unblocked from any thread,
//! per `TaskBlocking.cpp`/`api/nodes/blocking.h`.
//!
//! A blocking context is just the raw task id `task_id` already returns —
//! there is no separate handle type, since blocking and taskwait share the
//! same park/wake table underneath.

use std::time::Duration;

use depcore::TaskId;

use crate::runtime;
use crate::task::TaskHandle;

/// An opaque context a task uses to block and be unblocked, obtained from
/// the task it will block on behalf of.
pub type BlockingContext = u64;

/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn current_blocking_context(task: TaskHandle) -> BlockingContext {
    unsafe { crate::task::task_id(task) }
}

/// Blocks the calling OS thread until [`unblock`] is called for the same
/// context. Safe to call even if `unblock` already fired first.
#[no_mangle]
pub extern "C" fn block_current(context: BlockingContext) {
    runtime::get().pause_table.park(TaskId::from_raw(context));
}

/// Unblocks whatever thread is (or is about to be) parked in
/// [`block_current`] for `context`.
#[no_mangle]
pub extern "C" fn unblock(context: BlockingContext) {
    runtime::get().pause_table.wake(TaskId::from_raw(context));
}

/// Blocks until unblocked or `timeout_us` microseconds elapse. Returns
/// `true` if unblocked, `false` if the wait timed out.
#[no_mangle]
pub extern "C" fn wait_for(context: BlockingContext, timeout_us: u64) -> bool {
    runtime::get()
        .pause_table
        .park_timeout(TaskId::from_raw(context), Duration::from_micros(timeout_us))
}

/// Cooperatively yields the calling OS thread back to the scheduler.
#[no_mangle]
pub extern "C" fn task_yield() {
    std::thread::yield_now();
}
