//! Shared reduction descriptor and per-worker slot storage.
//!
//! A `ReductionInfo` is shared by every sibling reduction access on the
//! same `(address, length, operator)`. Its registered-accesses counter
//! starts at **2**, not 1: one for the access that creates it and one held
//! by the parent's `BottomMap` open-reduction slot, released
//! independently. Slot storage is allocated lazily, one slot per worker,
//! guarded by a short spin lock — contention is rare since a worker only
//! ever touches its own slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::access::AccessState;
use crate::sync::SpinLock;

/// Type-erased reduction operations over a byte buffer of `element_size()`
/// bytes. A typed convenience wrapper is provided by [`TypedReduction`].
pub trait ReductionOps: Send + Sync {
    fn element_size(&self) -> usize;
    fn init(&self, slot: &mut [u8]);
    fn combine(&self, dest: &mut [u8], src: &[u8]);
}

/// Reduction over a single `Copy` accumulator type, e.g. `i64` summation.
pub struct TypedReduction<T> {
    init: Box<dyn Fn() -> T + Send + Sync>,
    combine: Box<dyn Fn(T, T) -> T + Send + Sync>,
}

impl<T: Copy + Send + Sync + 'static> TypedReduction<T> {
    pub fn new(
        init: impl Fn() -> T + Send + Sync + 'static,
        combine: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Arc<dyn ReductionOps> {
        Arc::new(Self {
            init: Box::new(init),
            combine: Box::new(combine),
        })
    }
}

impl<T: Copy + Send + Sync + 'static> ReductionOps for TypedReduction<T> {
    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn init(&self, slot: &mut [u8]) {
        debug_assert_eq!(slot.len(), self.element_size());
        let value = (self.init)();
        unsafe { std::ptr::write_unaligned(slot.as_mut_ptr().cast::<T>(), value) };
    }

    fn combine(&self, dest: &mut [u8], src: &[u8]) {
        debug_assert_eq!(dest.len(), self.element_size());
        debug_assert_eq!(src.len(), self.element_size());
        unsafe {
            let dest_val = std::ptr::read_unaligned(dest.as_ptr().cast::<T>());
            let src_val = std::ptr::read_unaligned(src.as_ptr().cast::<T>());
            let combined = (self.combine)(dest_val, src_val);
            std::ptr::write_unaligned(dest.as_mut_ptr().cast::<T>(), combined);
        }
    }
}

pub struct ReductionInfo {
    pub address: usize,
    pub length: usize,
    ops: Arc<dyn ReductionOps>,
    registered: AtomicUsize,
    slots: SpinLock<Vec<Option<Vec<u8>>>>,
    /// The most recently registered sibling access. BottomMap's own entry
    /// gets overwritten the moment a later access (reduction or not)
    /// registers at the same address, so this is the only place that
    /// reliably still points at the access whose successor edge leads to
    /// whatever runs after the whole reduction — whichever unregister call
    /// ends up bringing `registered` to zero forwards through this one,
    /// not through itself.
    last_access: Mutex<Option<Arc<AccessState>>>,
}

impl ReductionInfo {
    pub fn new(address: usize, length: usize, ops: Arc<dyn ReductionOps>) -> Arc<Self> {
        Arc::new(Self {
            address,
            length,
            ops,
            registered: AtomicUsize::new(2),
            slots: SpinLock::new(Vec::new()),
            last_access: Mutex::new(None),
        })
    }

    pub fn register(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns whether this was the final registration to close: caller
    /// should call `combine()`.
    pub fn unregister(&self) -> bool {
        let prev = self.registered.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "reduction unregistered more times than registered");
        prev - 1 == 0
    }

    pub fn set_last_access(&self, access: Arc<AccessState>) {
        *self.last_access.lock().unwrap() = Some(access);
    }

    pub fn last_access(&self) -> Option<Arc<AccessState>> {
        self.last_access.lock().unwrap().clone()
    }

    /// Returns a raw pointer to the worker-private slot, allocating and
    /// initializing it on first claim. Consecutive claims by the same
    /// worker see the same storage.
    pub fn get_free_slot(&self, worker_id: usize) -> *mut u8 {
        let mut slots = self.slots.lock();
        if worker_id >= slots.len() {
            slots.resize_with(worker_id + 1, || None);
        }
        if slots[worker_id].is_none() {
            let mut buf = vec![0u8; self.length * self.ops.element_size()];
            for chunk in buf.chunks_mut(self.ops.element_size()) {
                self.ops.init(chunk);
            }
            slots[worker_id] = Some(buf);
        }
        slots[worker_id].as_mut().unwrap().as_mut_ptr()
    }

    /// Applies the combine function from every initialized slot into the
    /// original address, then frees slot storage. Invoked exactly once,
    /// when the registered-accesses counter reaches zero.
    pub fn combine(&self) {
        let mut slots = self.slots.lock();
        let element_size = self.ops.element_size();
        let dest = unsafe { std::slice::from_raw_parts_mut(self.address as *mut u8, self.length * element_size) };
        for slot in slots.iter().flatten() {
            for (dest_chunk, src_chunk) in dest.chunks_mut(element_size).zip(slot.chunks(element_size)) {
                self.ops.combine(dest_chunk, src_chunk);
            }
        }
        slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_reduction_combines_all_slots() {
        let mut target: i64 = 0;
        let ops = TypedReduction::new(|| 0i64, |a: i64, b: i64| a + b);
        let info = ReductionInfo::new(&mut target as *mut i64 as usize, 1, ops);

        for worker in 0..4 {
            let slot = info.get_free_slot(worker) as *mut i64;
            unsafe {
                *slot += 1;
            }
        }
        info.combine();
        assert_eq!(target, 4);
    }
}
