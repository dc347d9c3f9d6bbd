//! Low-level spin and blocking primitives used throughout the dependency
//! core. These exist because the core's suspension points block the OS
//! thread of the worker that hit them rather than yielding to an async
//! runtime (see SPEC_FULL.md, "Why no async runtime").

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Number of spin iterations before falling back to `thread::yield_now`.
const SPIN_THRESHOLD: usize = 1000;

fn spin_wait(attempt: &mut usize) {
    if *attempt < SPIN_THRESHOLD {
        std::hint::spin_loop();
        *attempt += 1;
    } else {
        std::thread::yield_now();
    }
}

/// A simple CAS-based spin lock, the same shape as the runtime's
/// `SpinLock`: a single `AtomicBool` guard with a bounded spin before
/// yielding the thread.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut attempt = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_wait(&mut attempt);
        }
        SpinLockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A FIFO ticket spin lock: callers draw a ticket and spin until it is
/// being served. Used where bare `SpinLock`'s lack of fairness would let a
/// long-waiting caller starve (the commutative semaphore's admission path).
pub struct TicketSpinLock<T> {
    next_free: AtomicUsize,
    now_serving: AtomicUsize,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TicketSpinLock<T> {}
unsafe impl<T: Send> Sync for TicketSpinLock<T> {}

pub struct TicketSpinLockGuard<'a, T> {
    lock: &'a TicketSpinLock<T>,
}

impl<T> TicketSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next_free: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> TicketSpinLockGuard<'_, T> {
        let ticket = self.next_free.fetch_add(1, Ordering::Relaxed);
        let mut attempt = 0;
        while self.now_serving.load(Ordering::Acquire) != ticket {
            spin_wait(&mut attempt);
        }
        TicketSpinLockGuard { lock: self }
    }
}

impl<'a, T> Deref for TicketSpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for TicketSpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for TicketSpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

/// A FIFO-queued blocking mutex exposed through the ABI as
/// `user_lock`/`user_unlock`. Ownership transfers directly to the next
/// waiter on unlock rather than reopening the fast path, matching the
/// reference `UserMutex`.
pub struct UserMutex {
    held: AtomicBool,
    waiters: SpinLock<VecDeque<std::thread::Thread>>,
}

impl Default for UserMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl UserMutex {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Blocks the calling OS thread until the mutex is acquired.
    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }
        let me = std::thread::current();
        {
            let mut queue = self.waiters.lock();
            // Re-check under the queue lock: the holder may have unlocked
            // and handed ownership to us directly between the fast-path
            // failure above and taking this lock.
            if self.try_lock() {
                return;
            }
            queue.push_back(me.clone());
        }
        loop {
            std::thread::park();
            if self.held.load(Ordering::Acquire) {
                // Woken with ownership transferred directly; nothing else
                // to do. `held` was never cleared on our behalf.
                return;
            }
        }
    }

    /// Releases the mutex, transferring ownership directly to the
    /// longest-waiting queued thread if one exists.
    pub fn unlock(&self) {
        let mut queue = self.waiters.lock();
        match queue.pop_front() {
            Some(next) => {
                // Ownership transfers without ever clearing `held`.
                next.unpark();
            }
            None => {
                self.held.store(false, Ordering::Release);
            }
        }
    }
}
