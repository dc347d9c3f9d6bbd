//! `user_lock`/`user_unlock`: a FIFO-queued blocking mutex, lazily
//! allocated behind a double-checked-locking atomic pointer so that a
//! caller-owned, zero-initialized pointer-sized slot can serve as the
//! entire handle (the reference's `UserMutex`, ported as
//! `depcore::sync::UserMutex`).

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

use depcore::sync::UserMutex;

/// The caller-owned slot backing one lock: a single pointer-sized word,
/// initially null, that this module fills in on first use. Callers must
/// zero-initialize it before the first `user_lock` call and never touch
/// it themselves afterward.
pub type UserLockSlot = *mut c_void;

fn slot(ptr: *mut UserLockSlot) -> &'static AtomicPtr<UserMutex> {
    // SAFETY: `AtomicPtr<T>` has the same in-memory representation as
    // `*mut T`, so reinterpreting a caller's `*mut *mut c_void` word as
    // `*const AtomicPtr<UserMutex>` is valid as long as the word is
    // correctly aligned and not concurrently freed, both of which are the
    // caller's responsibility per this function's safety contract.
    unsafe { &*(ptr as *const AtomicPtr<UserMutex>) }
}

fn get_or_create(atomic: &AtomicPtr<UserMutex>) -> &'static UserMutex {
    let existing = atomic.load(Ordering::Acquire);
    if !existing.is_null() {
        return unsafe { &*existing };
    }
    let fresh = Box::into_raw(Box::new(UserMutex::new()));
    match atomic.compare_exchange(std::ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => unsafe { &*fresh },
        Err(winner) => {
            // Lost the race: another thread already published a mutex.
            // Drop our redundant allocation and use theirs.
            drop(unsafe { Box::from_raw(fresh) });
            unsafe { &*winner }
        }
    }
}

/// # Safety
/// `slot` must point at a valid, caller-owned `UserLockSlot`, zero-
/// initialized before its first use by any `user_lock`/`user_unlock`
/// call.
#[no_mangle]
pub unsafe extern "C" fn user_lock(slot_ptr: *mut UserLockSlot) {
    get_or_create(slot(slot_ptr)).lock();
}

/// # Safety
/// `slot` must point at a slot previously locked by `user_lock` on this
/// thread (or one that has since transferred ownership here).
#[no_mangle]
pub unsafe extern "C" fn user_unlock(slot_ptr: *mut UserLockSlot) {
    let atomic = slot(slot_ptr);
    let existing = atomic.load(Ordering::Acquire);
    debug_assert!(!existing.is_null(), "user_unlock on a slot never locked");
    if !existing.is_null() {
        unsafe { &*existing }.unlock();
    }
}
