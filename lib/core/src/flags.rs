//! The atomic flag word carried by every [`crate::access::AccessState`].
//!
//! All bits live in a single word so that a transition can be expressed as
//! one `fetch_or`, keeping the state machine lock-free.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// All read-class predecessors relevant to this access are done.
        const READ_SATISFIED        = 1 << 0;
        /// The predecessor's write has completed.
        const WRITE_SATISFIED       = 1 << 1;
        /// The predecessor's concurrent run has completed.
        const CONCURRENT_SATISFIED  = 1 << 2;
        /// Commutative admission has been granted by the semaphore.
        const COMMUTATIVE_SATISFIED = 1 << 3;

        /// A successor edge has been published.
        const HAS_NEXT      = 1 << 4;
        /// The successor edge points at the owning task's parent.
        const NEXT_IS_PARENT = 1 << 5;

        /// This access is the parent containment point for at least one
        /// child task's access at the same address.
        const HAS_CHILD = 1 << 6;
        /// The last child access registered under this one has finished
        /// its own chain. Exactly one bit regardless of the child's access
        /// kind: a parent access only ever tracks the single most recent
        /// child at an address (see `BottomMap`).
        const CHILD_DONE = 1 << 7;

        /// The owning task has finished and released this edge.
        const UNREGISTERED = 1 << 11;
        /// The parent finalized its own registration scope.
        const PARENT_DONE  = 1 << 12;
        /// The reduction was merged into its `ReductionInfo`.
        const REDUCTION_COMBINED = 1 << 13;
        /// Kept in the flag word so kind/weakness updates are atomic with
        /// state moves.
        const IS_WEAK = 1 << 14;
    }
}
