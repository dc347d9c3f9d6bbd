//! Discrete dependency system: the data structures, flag-based state
//! machines, and propagation protocol that implement per-address access
//! chains, parent/child scoping, reduction combination, commutative
//! admission, and the taskwait/release lifecycle for a task-parallel
//! dataflow runtime.
//!
//! This crate has no knowledge of an executor, a compiler ABI, or
//! hardware topology — those are collaborators, wired up by `depabi` and
//! `depexec`. See `SPEC_FULL.md` at the workspace root for the full
//! requirements this crate implements.

pub mod access;
pub mod access_map;
pub mod bottom_map;
pub mod commutative;
pub mod error;
pub mod flags;
pub mod mailbox;
pub mod reduction;
pub mod sync;
pub mod system;
pub mod task;

pub use access::{AccessKind, AccessState};
pub use error::{Error, Result};
pub use system::{AccessDecl, DependencySystem, TaskwaitOutcome};
pub use task::{TaskFlags, TaskId, TaskNode};
