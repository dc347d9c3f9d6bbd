//! The C-compatible task lifecycle surface: create, declare accesses,
//! taskwait, release, finalize. A `TaskHandle` is an opaque pointer to a
//! leaked `Arc<TaskNode>`; callers own the handle's lifetime and must
//! balance every `task_create` with a `task_destroy`, matching the
//! reference runtime's handle-per-task-metadata convention.

use std::sync::Arc;

use depcore::{AccessDecl, AccessKind, Error, Result, TaskFlags, TaskNode, TaskwaitOutcome};

use crate::reduction::ForeignReduction;
use crate::runtime;

pub type TaskHandle = *mut Arc<TaskNode>;

fn leak(node: Arc<TaskNode>) -> TaskHandle {
    Box::into_raw(Box::new(node))
}

/// # Safety
/// `handle` must be a live pointer returned by `task_create` and not yet
/// passed to `task_destroy`.
unsafe fn borrow<'a>(handle: TaskHandle) -> &'a Arc<TaskNode> {
    debug_assert!(!handle.is_null(), "null task handle");
    unsafe { &*handle }
}

/// One access declaration as the ABI passes it: a flat, repr(C) struct
/// rather than `core`'s builder-style `AccessDecl`, plus the raw function
/// pointers a `Reduction` kind needs. `reduction_init`/`reduction_combine`
/// are ignored (may be null) for every other kind.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CAccessKind {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
    Concurrent = 3,
    Commutative = 4,
    Reduction = 5,
}

impl From<CAccessKind> for AccessKind {
    fn from(kind: CAccessKind) -> Self {
        match kind {
            CAccessKind::Read => AccessKind::Read,
            CAccessKind::Write => AccessKind::Write,
            CAccessKind::ReadWrite => AccessKind::ReadWrite,
            CAccessKind::Concurrent => AccessKind::Concurrent,
            CAccessKind::Commutative => AccessKind::Commutative,
            CAccessKind::Reduction => AccessKind::Reduction,
        }
    }
}

#[repr(C)]
pub struct CAccessDecl {
    pub kind: CAccessKind,
    pub weak: bool,
    pub address: usize,
    pub length: usize,
    pub symbol: u8,
    pub reduction_element_size: usize,
    pub reduction_init: Option<super::reduction::ReductionInitFn>,
    pub reduction_combine: Option<super::reduction::ReductionCombineFn>,
}

fn decl_from_c(c: &CAccessDecl) -> Result<AccessDecl> {
    let mut decl = AccessDecl::new(c.kind.into(), c.address, c.length);
    decl.symbol = c.symbol;
    if c.weak {
        decl = decl.weak();
    }
    if c.kind == CAccessKind::Reduction {
        let init = c
            .reduction_init
            .ok_or_else(|| Error::Programming("reduction access missing init function".to_string()))?;
        let combine = c
            .reduction_combine
            .ok_or_else(|| Error::Programming("reduction access missing combine function".to_string()))?;
        decl = decl.reduction(Arc::new(ForeignReduction::new(c.reduction_element_size, init, combine)));
    }
    Ok(decl)
}

#[no_mangle]
pub extern "C" fn task_create(parent: TaskHandle, flags: u32) -> TaskHandle {
    let rt = runtime::get();
    let parent_ref = if parent.is_null() {
        None
    } else {
        Some(unsafe { borrow(parent) })
    };
    let node = rt.system.create_task(parent_ref, TaskFlags::from_bits_truncate(flags));
    leak(node)
}

/// Declares every access in `decls` for `task`, chained behind `parent`'s
/// bottom map. Returns whether the task is immediately runnable.
///
/// # Safety
/// `task` and `parent` (if non-null) must be live handles; `decls` must
/// point at `decls_len` valid `CAccessDecl` values.
#[no_mangle]
pub unsafe extern "C" fn task_register(
    task: TaskHandle,
    parent: TaskHandle,
    decls: *const CAccessDecl,
    decls_len: usize,
) -> bool {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    let parent_ref = if parent.is_null() {
        None
    } else {
        Some(unsafe { borrow(parent) })
    };
    let decls: Vec<AccessDecl> = if decls_len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(decls, decls_len) }
    }
    .iter()
    .map(decl_from_c)
    .collect::<Result<_>>()
    .unwrap_or_else(|err| runtime::abort_on_programming_error(Err(err)));
    runtime::abort_on_programming_error(rt.system.register(task, parent_ref, decls))
}

/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn task_finalize(task: TaskHandle) {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    runtime::abort_on_programming_error(rt.system.finalize(task));
}

/// Returns whether the calling thread must block (via
/// `executor_park_current`) before continuing past this taskwait.
///
/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn task_taskwait(task: TaskHandle) -> bool {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    matches!(rt.system.taskwait(task), TaskwaitOutcome::MustPause)
}

/// # Safety
/// `task` must be a live handle, previously reported `MustPause` by
/// `task_taskwait` and already woken via `executor_park_current`.
#[no_mangle]
pub unsafe extern "C" fn task_taskwait_resume(task: TaskHandle) {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    rt.system.taskwait_resume(task);
}

/// # Safety
/// `task` must be a live handle with a matching prior declaration at
/// `address`.
#[no_mangle]
pub unsafe extern "C" fn task_release_access(task: TaskHandle, address: usize, kind: CAccessKind, weak: bool) {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    runtime::abort_on_programming_error(rt.system.release_access(task, address, kind.into(), weak));
}

/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn task_release_commutative(task: TaskHandle) {
    let rt = runtime::get();
    let task = unsafe { borrow(task) };
    rt.system.release_commutative(task);
}

/// The raw id this task was assigned, for pairing with
/// `executor_park_current`/`executor_wake`.
///
/// # Safety
/// `task` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn task_id(task: TaskHandle) -> u64 {
    let task = unsafe { borrow(task) };
    task.id.raw()
}

/// Frees a task handle. Does not affect the task's state in the
/// dependency system, which is retained independently by internal
/// bookkeeping; only the caller's own handle is released.
///
/// # Safety
/// `task` must be a live handle not subsequently used.
#[no_mangle]
pub unsafe extern "C" fn task_destroy(task: TaskHandle) {
    if !task.is_null() {
        drop(unsafe { Box::from_raw(task) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_task_with_no_accesses_is_immediately_runnable() {
        let task = task_create(std::ptr::null_mut(), 0);
        let runnable = unsafe { task_register(task, std::ptr::null_mut(), std::ptr::null(), 0) };
        assert!(runnable);
        unsafe { task_finalize(task) };
        unsafe { task_destroy(task) };
    }

    #[test]
    fn write_then_read_on_same_address_orders_through_bottom_map() {
        let mut value: i64 = 0;
        let address = &mut value as *mut i64 as usize;

        let parent = task_create(std::ptr::null_mut(), 0);
        unsafe { task_register(parent, std::ptr::null_mut(), std::ptr::null(), 0) };

        let writer = task_create(parent, 0);
        let write_decl = CAccessDecl {
            kind: CAccessKind::Write,
            weak: false,
            address,
            length: std::mem::size_of::<i64>(),
            symbol: 0,
            reduction_element_size: 0,
            reduction_init: None,
            reduction_combine: None,
        };
        let writer_runnable = unsafe { task_register(writer, parent, &write_decl, 1) };
        assert!(writer_runnable);
        unsafe { task_finalize(writer) };

        let reader = task_create(parent, 0);
        let read_decl = CAccessDecl {
            kind: CAccessKind::Read,
            weak: false,
            address,
            length: std::mem::size_of::<i64>(),
            symbol: 0,
            reduction_element_size: 0,
            reduction_init: None,
            reduction_combine: None,
        };
        let reader_runnable = unsafe { task_register(reader, parent, &read_decl, 1) };
        assert!(reader_runnable, "writer already finalized, reader should not wait");
        unsafe { task_finalize(reader) };

        unsafe { task_destroy(writer) };
        unsafe { task_destroy(reader) };
        unsafe { task_destroy(parent) };
    }
}
