//! C-compatible ABI surface over `depcore` and `depexec`: the process-wide
//! runtime singleton, task lifecycle handles, event counters, the user
//! mutex, function-spawn memoization, and version negotiation. Every
//! `#[no_mangle] extern "C"` function here is a thin wrapper; the actual
//! algorithms live in `depcore`.
//!
//! Fatal programming errors reported by `depcore` are collapsed into a
//! process abort at this boundary (`runtime::abort_on_programming_error`)
//! rather than propagated as a Rust `Result`, since a C caller has no way
//! to receive one — see SPEC_FULL.md §7.

pub mod blocking;
pub mod events;
pub mod executor;
pub mod lock;
pub mod reduction;
pub mod runtime;
pub mod spawn;
pub mod task;
pub mod version;

pub use blocking::BlockingContext;
pub use task::{CAccessDecl, CAccessKind, TaskHandle};

/// Initializes the process-wide runtime (dependency system plus worker
/// pool) if it has not already been built. Idempotent: safe to call from
/// every translation unit's static constructor.
#[no_mangle]
pub extern "C" fn runtime_init() {
    runtime::init();
}

/// Stops the worker pool once every task has finished, the bootstrap
/// counterpart to `runtime_init`. Call once, at process shutdown.
#[no_mangle]
pub extern "C" fn runtime_shutdown() {
    runtime::shutdown();
}
