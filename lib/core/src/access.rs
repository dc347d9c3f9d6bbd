//! Access kinds and the per-access descriptor.

pub mod state;

pub use state::{AccessState, Disposable, Message};

use crate::error::{Error, Result};

/// The six data access kinds a task may declare over an address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
    Concurrent,
    Commutative,
    Reduction,
}

impl AccessKind {
    /// Combines two accesses declared by the same task on the same
    /// address. Identical kinds are idempotent; otherwise the pair
    /// upgrades to `ReadWrite`, except that a `Reduction` can only ever
    /// combine with another `Reduction` on the same operator.
    pub fn combine(self, other: AccessKind) -> Result<AccessKind> {
        if self == other {
            return Ok(self);
        }
        if self == AccessKind::Reduction || other == AccessKind::Reduction {
            return Err(Error::Programming(format!(
                "cannot combine reduction access with {other:?} on the same address"
            )));
        }
        Ok(AccessKind::ReadWrite)
    }
}

/// `weak ∧ ¬weak → ¬weak`: combining a weak and a non-weak declaration on
/// the same address yields a non-weak access.
pub fn combine_weak(a: bool, b: bool) -> bool {
    a && b
}
