//! Thread-pool collaborator for `depcore`. The core never owns worker
//! threads (SPEC_FULL.md §5/§9: "the core runs *inside* the worker... and
//! never owns worker threads") — it only calls back into whatever wakes a
//! paused task. This crate is that collaborator: a plain `std::thread`
//! work-stealing pool, no async runtime, mirroring the teacher's
//! `worker_pool::Config` shape without its `tokio` plumbing (see
//! SPEC_FULL.md, "Why no async runtime").

mod pause;

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as LocalQueue};
use thiserror::Error as ThisError;

pub use pause::PauseTable;

thread_local! {
    static WORKER_ID: Cell<Option<usize>> = Cell::new(None);
}

/// The stable index of the worker thread running the calling code, or
/// `None` off a pool thread. Reduction bodies use this to pick their
/// per-worker slot (`ReductionInfo::get_free_slot`) — a slot is only ever
/// touched by the thread it belongs to, so the index has to come from the
/// executing thread itself, never from a task's position in a submission
/// loop.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(Cell::get)
}

/// One unit of work submitted to the pool: a task's body plus the id it
/// runs under, so panics and completion can be attributed.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("executor pool already shut down")]
    ShutDown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Worker-count and naming knobs, mirroring the teacher's
/// `WorkerPoolConfig`: a plain value type constructed once by the host
/// binary and handed to `Executor::start`.
#[derive(Clone, Debug)]
pub struct Config {
    pub worker_count: usize,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            thread_name_prefix: "depexec-worker".to_string(),
        }
    }
}

/// A running pool of worker threads pulling from a shared injector queue
/// with per-worker deques, stealing from each other when their own queue
/// and the injector are both empty (standard `crossbeam-deque` topology).
pub struct Executor {
    injector: Arc<Injector<Job>>,
    stealers: Arc<Vec<Stealer<Job>>>,
    running: Arc<AtomicBool>,
    // Behind a `Mutex` (rather than owned by value) so `shutdown` can be
    // called through a shared reference — callers that hold the executor
    // behind a process-wide `&'static` singleton (the `abi` crate's
    // `Runtime`) have no way to move it out by value.
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Starts `config.worker_count` worker threads immediately.
    pub fn start(config: Config) -> Self {
        let injector = Arc::new(Injector::new());
        let running = Arc::new(AtomicBool::new(true));

        let locals: Vec<LocalQueue<Job>> = (0..config.worker_count.max(1)).map(|_| LocalQueue::new_fifo()).collect();
        let stealers: Arc<Vec<Stealer<Job>>> = Arc::new(locals.iter().map(LocalQueue::stealer).collect());

        let handles = locals
            .into_iter()
            .enumerate()
            .map(|(idx, local)| {
                let injector = injector.clone();
                let stealers = stealers.clone();
                let running = running.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{idx}", config.thread_name_prefix))
                    .spawn(move || worker_loop(idx, local, injector, stealers, running))
                    .expect("spawn worker thread")
            })
            .collect();

        Self {
            injector,
            stealers,
            running,
            handles: Mutex::new(handles),
        }
    }

    /// Submits a job to the shared injector queue. Any idle worker may pick
    /// it up; there is no affinity to the submitting thread.
    pub fn submit(&self, job: Job) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        self.injector.push(job);
        Ok(())
    }

    /// Stops accepting new work and waits for every in-flight job to
    /// finish. Already-queued jobs are still drained before threads exit.
    /// Idempotent: a second call joins an already-empty handle list and
    /// returns immediately.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.stealers.len()
    }
}

fn worker_loop(
    idx: usize,
    local: LocalQueue<Job>,
    injector: Arc<Injector<Job>>,
    stealers: Arc<Vec<Stealer<Job>>>,
    running: Arc<AtomicBool>,
) {
    WORKER_ID.with(|w| w.set(Some(idx)));
    loop {
        let job = local.pop().or_else(|| steal_from_others(&local, &injector, &stealers));
        match job {
            Some(job) => run_one(job),
            None => {
                if !running.load(Ordering::Acquire) && injector.is_empty() {
                    return;
                }
                std::thread::yield_now();
            }
        }
    }
}

fn steal_from_others(local: &LocalQueue<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) -> Option<Job> {
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(job) => return Some(job),
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }
    for stealer in stealers {
        loop {
            match stealer.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }
    None
}

/// Runs one job, converting a panicking body into a logged failure rather
/// than unwinding through the pool (SPEC_FULL.md §9: "task bodies that
/// panic are caught at the executor boundary ... never unwound through the
/// core's atomic state transitions").
fn run_one(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task body panicked with a non-string payload".to_string());
        tracing::error!(panic = %message, "task body panicked");
    }
}
