//! Per-task park/wake pairing for `DependencySystem::taskwait`'s
//! `MustPause` outcome. A task that must block registers its waiter here,
//! blocks the OS thread it is running on, and is woken by whichever
//! `on_ready` callback fires once its last child finishes — the same
//! Condvar-based, lost-wakeup-safe pattern used by the scenario tests'
//! harness, lifted into the executor so callers outside `depcore`'s test
//! suite get it too.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use depcore::TaskId;

struct Gate {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut fired = self.mutex.lock().unwrap();
        while !*fired {
            fired = self.condvar.wait(fired).unwrap();
        }
    }

    /// Waits until notified or `timeout` elapses. Returns whether it was
    /// notified (`false` means the timeout fired first).
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let fired = self.mutex.lock().unwrap();
        let (guard, _) = self.condvar.wait_timeout_while(fired, timeout, |fired| !*fired).unwrap();
        *guard
    }

    fn notify(&self) {
        *self.mutex.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

/// A registry of park points, one per currently-blocked task.
pub struct PauseTable {
    gates: Mutex<HashMap<TaskId, Arc<Gate>>>,
}

impl Default for PauseTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseTable {
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `task` as about to block, then blocks the calling thread
    /// until [`PauseTable::wake`] is called for the same id. The gate is
    /// registered before the caller can possibly miss a concurrent wake —
    /// callers must register here *before* they check whatever condition
    /// the wake is waiting on, not after.
    pub fn park(&self, task: TaskId) {
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            gates.entry(task).or_insert_with(|| Arc::new(Gate::new())).clone()
        };
        gate.wait();
        self.gates.lock().unwrap().remove(&task);
    }

    /// Wakes `task` if it is (or is about to be) parked. A wake that races
    /// ahead of the matching `park` call is not lost: the gate is created
    /// on first touch by either side and `notify` latches its fired bit
    /// before the waiter ever checks it.
    pub fn wake(&self, task: TaskId) {
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            gates.entry(task).or_insert_with(|| Arc::new(Gate::new())).clone()
        };
        gate.notify();
    }

    /// Like [`PauseTable::park`], but gives up after `timeout` if no
    /// matching `wake` arrives. Returns whether it was woken.
    pub fn park_timeout(&self, task: TaskId, timeout: Duration) -> bool {
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            gates.entry(task).or_insert_with(|| Arc::new(Gate::new())).clone()
        };
        let woken = gate.wait_timeout(timeout);
        self.gates.lock().unwrap().remove(&task);
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depcore::{DependencySystem, TaskFlags};
    use std::sync::Barrier;

    #[test]
    fn wake_before_park_is_not_lost() {
        let table = Arc::new(PauseTable::new());
        let system = DependencySystem::new(|_| {}, |_| {});
        let task = system.create_task(None, TaskFlags::empty());
        let id = task.id;
        let barrier = Arc::new(Barrier::new(2));

        let t = {
            let table = table.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                table.wake(id);
            })
        };
        barrier.wait();
        std::thread::sleep(std::time::Duration::from_millis(20));
        table.park(id);
        t.join().unwrap();
    }

    #[test]
    fn park_timeout_reports_timeout_when_never_woken() {
        let table = PauseTable::new();
        let system = DependencySystem::new(|_| {}, |_| {});
        let task = system.create_task(None, TaskFlags::empty());
        let woken = table.park_timeout(task.id, Duration::from_millis(20));
        assert!(!woken);
    }

    #[test]
    fn park_timeout_reports_woken_when_notified_in_time() {
        let table = Arc::new(PauseTable::new());
        let system = DependencySystem::new(|_| {}, |_| {});
        let task = system.create_task(None, TaskFlags::empty());
        let id = task.id;

        let t = {
            let table = table.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                table.wake(id);
            })
        };
        let woken = table.park_timeout(id, Duration::from_secs(5));
        t.join().unwrap();
        assert!(woken);
    }
}
