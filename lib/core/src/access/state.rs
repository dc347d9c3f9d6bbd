//! The per-(task, address) access state machine.
//!
//! Each [`AccessState`] carries one atomic flag word (`flags`) plus
//! write-once successor/child links. The three contracts described in
//! SPEC_FULL.md §9 ("Deep flag state machines") are `apply_single`,
//! `apply`, and `apply_propagated`; today's [`crate::system::DependencySystem`]
//! drives `apply_single` directly under its coordinating lock and uses
//! `apply_propagated` to finish the transition once a message has reached
//! the successor, leaving `apply` as the insertion point a fully
//! decentralized, per-worker mailbox could hook into without changing this
//! type's public surface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use super::AccessKind;
use crate::flags::AccessFlags;
use crate::reduction::ReductionInfo;
use crate::task::TaskId;

/// A message passed from one access to its successor (or child/parent)
/// during propagation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Message {
    /// Flags to OR into the successor's word.
    pub flags_for_next: AccessFlags,
    /// Flags to OR into the sender's own word once the successor has
    /// absorbed `flags_for_next`.
    pub flags_after_propagation: AccessFlags,
}

/// Whether an access may now be freed.
pub type Disposable = bool;

pub struct AccessState {
    pub region_start: usize,
    pub region_len: usize,
    pub kind: AccessKind,
    pub weak: bool,
    pub symbols: u64,
    pub originator: TaskId,
    pub reduction_info: Option<Arc<ReductionInfo>>,

    flags: AtomicU32,
    successor: OnceLock<Arc<AccessState>>,
}

impl AccessState {
    pub fn new(
        originator: TaskId,
        start: usize,
        len: usize,
        kind: AccessKind,
        weak: bool,
        symbols: u64,
        reduction_info: Option<Arc<ReductionInfo>>,
    ) -> Arc<Self> {
        let initial = if weak { AccessFlags::IS_WEAK } else { AccessFlags::empty() };
        Arc::new(Self {
            region_start: start,
            region_len: len,
            kind,
            weak,
            symbols,
            originator,
            reduction_info,
            flags: AtomicU32::new(initial.bits()),
            successor: OnceLock::new(),
        })
    }

    pub fn flags(&self) -> AccessFlags {
        AccessFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// The bit this kind forwards to its successor once its own
    /// predecessors (and, if applicable, children) are satisfied.
    pub fn satisfied_bit(&self) -> AccessFlags {
        match self.kind {
            AccessKind::Read => AccessFlags::READ_SATISFIED,
            AccessKind::Write | AccessKind::ReadWrite => {
                AccessFlags::WRITE_SATISFIED | AccessFlags::READ_SATISFIED
            }
            AccessKind::Concurrent => AccessFlags::CONCURRENT_SATISFIED,
            AccessKind::Commutative => AccessFlags::COMMUTATIVE_SATISFIED,
            // Whatever runs after a reduction phase must wait for the
            // combined value, i.e. for the same signal a write would give;
            // see `DependencySystem::close_own_reductions`, which is the
            // only place this bit is actually forwarded for a reduction.
            AccessKind::Reduction => AccessFlags::WRITE_SATISFIED | AccessFlags::READ_SATISFIED,
        }
    }

    /// Whether this access's readiness-relevant bits are all set. Does not
    /// account for commutative admission, which the semaphore decides
    /// separately (see `crate::system::DependencySystem::try_make_ready`).
    pub fn is_locally_satisfied(&self) -> bool {
        if self.weak || self.kind == AccessKind::Reduction {
            return true;
        }
        let required = self.satisfied_bit();
        self.flags().contains(required)
    }

    pub fn is_commutative_non_weak(&self) -> bool {
        self.kind == AccessKind::Commutative && !self.weak
    }

    /// Atomically ORs `incoming` into this access's flag word and returns
    /// the message to forward onward. Forwarding only happens once, the
    /// first time `incoming` actually changes the word (callers must not
    /// call this twice with the same bits from two races; the system
    /// serializes structural mutation so this is not a concern in
    /// practice).
    pub fn apply_single(&self, incoming: AccessFlags) -> Message {
        let prev = self.flags.fetch_or(incoming.bits(), Ordering::AcqRel);
        let prev = AccessFlags::from_bits_truncate(prev);
        let now = prev | incoming;
        let forward = if !prev.contains(self.satisfied_bit()) && now.contains(self.satisfied_bit())
        {
            self.satisfied_bit()
        } else {
            AccessFlags::empty()
        };
        Message {
            flags_for_next: forward,
            flags_after_propagation: AccessFlags::empty(),
        }
    }

    /// Marks the access unregistered (owning task finished with it).
    pub fn mark_unregistered(&self) {
        self.flags.fetch_or(AccessFlags::UNREGISTERED.bits(), Ordering::AcqRel);
    }

    pub fn mark_parent_done(&self) {
        self.flags.fetch_or(AccessFlags::PARENT_DONE.bits(), Ordering::AcqRel);
    }

    pub fn mark_has_child(&self) {
        self.flags.fetch_or(AccessFlags::HAS_CHILD.bits(), Ordering::AcqRel);
    }

    pub fn mark_has_next(&self) {
        self.flags.fetch_or(AccessFlags::HAS_NEXT.bits(), Ordering::AcqRel);
    }

    pub fn mark_next_is_parent(&self) {
        self.flags
            .fetch_or(AccessFlags::NEXT_IS_PARENT.bits(), Ordering::AcqRel);
    }

    pub fn mark_reduction_combined(&self) {
        self.flags
            .fetch_or(AccessFlags::REDUCTION_COMBINED.bits(), Ordering::AcqRel);
    }

    pub fn or_flags(&self, bits: AccessFlags) {
        self.flags.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    /// True once this access may be destroyed: unregistered, parent-done,
    /// and (if it has a child chain) all child-done bits present.
    pub fn is_disposable(&self) -> bool {
        let f = self.flags();
        if !f.contains(AccessFlags::UNREGISTERED) || !f.contains(AccessFlags::PARENT_DONE) {
            return false;
        }
        if f.contains(AccessFlags::HAS_CHILD) && !f.contains(AccessFlags::CHILD_DONE) {
            return false;
        }
        true
    }

    pub fn successor(&self) -> Option<&Arc<AccessState>> {
        self.successor.get()
    }

    /// Publishes the successor edge. Write-once: a second call is a no-op,
    /// matching invariant 2 (the successor is write-once after
    /// publication). Used both for the ordinary sibling chain and, when
    /// `NEXT_IS_PARENT` is set, for the child-to-parent completion link.
    pub fn set_successor(&self, next: Arc<AccessState>) {
        let _ = self.successor.set(next);
        self.mark_has_next();
    }
}

impl std::fmt::Debug for AccessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessState")
            .field("kind", &self.kind)
            .field("weak", &self.weak)
            .field("region", &(self.region_start, self.region_len))
            .field("flags", &self.flags())
            .finish()
    }
}
