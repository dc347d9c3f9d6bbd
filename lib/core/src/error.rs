//! Error types for the dependency core.
//!
//! Mirrors the four error kinds the runtime distinguishes: misuse of the
//! registration/release API, resource exhaustion, failures reported by the
//! executor collaborator, and debug-only invariant violations.

use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Misuse of the public API: releasing an access that was never
    /// declared, mismatched kind/weakness on release, incompatible
    /// reduction operators on the same address. Fatal, never recovered.
    #[error("programming error: {0}")]
    Programming(String),

    /// A task's metadata or access count exceeded the configured budget.
    #[error("resource exhausted: requested {requested}, budget {budget}")]
    ResourceExhausted { requested: usize, budget: usize },

    /// The executor collaborator reported a failure (bad worker id, pool
    /// shutdown mid-flight, ...).
    #[error("executor failure: {0}")]
    Executor(String),

    /// Caught only in debug builds: double free, mailbox reentrancy.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Programming(message.to_string())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Programming(message)
    }
}
