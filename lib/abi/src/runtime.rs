//! The process-wide singleton a compiled program's generated calls bind
//! against. Grounded in the reference runtime's bootstrap: one dependency
//! system, one worker pool, created once by the first `runtime_init` call
//! and torn down by `runtime_shutdown`.

use std::sync::OnceLock;

use depcore::{DependencySystem, TaskId};
use depexec::{Config, Executor, PauseTable};
use std::sync::Arc;

pub struct Runtime {
    pub system: DependencySystem,
    pub executor: Executor,
    pub pause_table: Arc<PauseTable>,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Builds the singleton the first time it is needed. `on_ready` is wired to
/// resubmit the task to the executor (ordinary ready path) or wake a
/// parked `taskwait` caller, depending on which the caller is currently
/// doing; since the ABI layer does not track task bodies itself (callers
/// own their own dispatch table), readiness here only wakes a parked
/// taskwait — resubmission for a plain task body is the caller's job,
/// driven by the boolean `register`/`finalize` already return.
fn build() -> Runtime {
    let pause_table = Arc::new(PauseTable::new());
    let wake_table = pause_table.clone();
    let system = DependencySystem::new(
        move |id: TaskId| wake_table.wake(id),
        |_id: TaskId| {
            // Disposal is owned by the caller's own task-metadata lifetime;
            // the core only needs to tell it when it is safe, which this
            // hook would forward to a caller-supplied callback in a fuller
            // embedding. No caller callback is registered at this layer.
        },
    );
    let executor = Executor::start(Config::default());
    Runtime {
        system,
        executor,
        pause_table,
    }
}

pub fn get() -> &'static Runtime {
    RUNTIME.get_or_init(build)
}

/// Stops accepting new work and joins every worker thread. Mirrors
/// `runtime_init`'s bootstrap pairing: the singleton itself is never torn
/// down (there is no way to reset a `OnceLock`), only its worker pool is,
/// matching a process-exit-time shutdown call rather than a re-initializable
/// one. Safe to call more than once; the second call joins an already-empty
/// handle list.
pub fn shutdown() {
    if let Some(rt) = RUNTIME.get() {
        rt.executor.shutdown();
    }
}

/// Initializes the runtime if it has not been already. Returns `true` if
/// this call performed initialization, `false` if the runtime already
/// existed (matching the reference's idempotent bootstrap entry point).
pub fn init() -> bool {
    let mut created = false;
    RUNTIME.get_or_init(|| {
        created = true;
        build()
    });
    created
}

/// Fatal programming errors never unwind across the ABI boundary: this is
/// the one place `core`'s `Result` is collapsed into an abort, per
/// SPEC_FULL.md §7 ("the safe core API itself never panics or aborts ...
/// only the C ABI boundary does").
pub fn abort_on_programming_error<T>(result: depcore::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %err, "fatal programming error at ABI boundary");
            std::process::abort();
        }
    }
}
