//! Registration, finalization, release, and taskwait entry/exit:
//! orchestrates propagation across [`AccessState`]s via a per-call
//! deferred [`Mailbox`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::access::{AccessKind, AccessState};
use crate::commutative::{mask_for_addresses, CommutativeMask, CommutativeSemaphore};
use crate::error::{Error, Result};
use crate::flags::AccessFlags;
use crate::mailbox::Mailbox;
use crate::reduction::{ReductionInfo, ReductionOps};
use crate::task::{TaskFlags, TaskId, TaskNode};

/// One access a task wants to declare, as handed to [`DependencySystem::register`].
pub struct AccessDecl {
    pub kind: AccessKind,
    pub weak: bool,
    pub address: usize,
    pub length: usize,
    pub symbol: u8,
    /// Present only for `AccessKind::Reduction`.
    pub reduction_ops: Option<Arc<dyn ReductionOps>>,
}

impl AccessDecl {
    pub fn new(kind: AccessKind, address: usize, length: usize) -> Self {
        Self {
            kind,
            weak: false,
            address,
            length,
            symbol: 0,
            reduction_ops: None,
        }
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    pub fn reduction(mut self, ops: Arc<dyn ReductionOps>) -> Self {
        self.reduction_ops = Some(ops);
        self
    }
}

/// Outcome of a `taskwait` call.
pub enum TaskwaitOutcome {
    /// No live children; the caller may continue immediately.
    Ready,
    /// The caller must block (via the executor's `pause`) and call
    /// [`DependencySystem::taskwait_resume`] once woken.
    MustPause,
}

struct TaskEntry {
    node: Arc<TaskNode>,
    commutative_mask: Option<CommutativeMask>,
}

pub struct DependencySystem {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    commutative: CommutativeSemaphore,
    on_ready: Box<dyn Fn(TaskId) + Send + Sync>,
    on_disposable: Box<dyn Fn(TaskId) + Send + Sync>,
}

/// Flags that are meaningful to propagate forward beyond the immediate
/// satisfied bit (so a write's satisfaction survives a run of readers).
const CARRY_MASK: AccessFlags = AccessFlags::from_bits_truncate(
    AccessFlags::READ_SATISFIED.bits()
        | AccessFlags::WRITE_SATISFIED.bits()
        | AccessFlags::CONCURRENT_SATISFIED.bits()
        | AccessFlags::COMMUTATIVE_SATISFIED.bits(),
);

impl DependencySystem {
    pub fn new(
        on_ready: impl Fn(TaskId) + Send + Sync + 'static,
        on_disposable: impl Fn(TaskId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            commutative: CommutativeSemaphore::new(),
            on_ready: Box::new(on_ready),
            on_disposable: Box::new(on_disposable),
        }
    }

    pub fn create_task(&self, parent: Option<&Arc<TaskNode>>, flags: TaskFlags) -> Arc<TaskNode> {
        let node = TaskNode::new(parent.map(|p| p.id), flags);
        if let Some(parent) = parent {
            parent.add_child();
        }
        self.tasks.lock().unwrap().insert(
            node.id,
            TaskEntry {
                node: node.clone(),
                commutative_mask: None,
            },
        );
        node
    }

    fn node_of(&self, id: TaskId) -> Option<Arc<TaskNode>> {
        self.tasks.lock().unwrap().get(&id).map(|e| e.node.clone())
    }

    /// Registers every declared access of `task` (step list of SPEC_FULL.md
    /// §4.6). Returns whether the task is immediately runnable.
    pub fn register(
        &self,
        task: &Arc<TaskNode>,
        parent: Option<&Arc<TaskNode>>,
        decls: Vec<AccessDecl>,
    ) -> Result<bool> {
        // Step 1: race guard. The task is not runnable until both the
        // declaration loop below and this function's own tail have run.
        task.increase_predecessors(2);

        let mut mailbox = Mailbox::new();
        let mut commutative_addresses = Vec::new();

        for decl in decls {
            // Boundary behavior: empty length or null address accesses
            // are silently ignored.
            if decl.address == 0 || decl.length == 0 {
                continue;
            }
            let is_commutative_non_weak = decl.kind == AccessKind::Commutative && !decl.weak;
            let access = self.insert_access(task, parent, decl, &mut mailbox)?;
            if is_commutative_non_weak {
                commutative_addresses.push(access.region_start);
            }
        }

        self.drain_mailbox(mailbox);

        // Step 5: decrement the race-guard counter.
        let predecessors_clear = task.decrease_predecessors(2);

        let commutative_ready = if commutative_addresses.is_empty() {
            true
        } else {
            let mask = mask_for_addresses(&commutative_addresses);
            self.tasks
                .lock()
                .unwrap()
                .get_mut(&task.id)
                .expect("task registered")
                .commutative_mask = Some(mask);
            self.commutative.try_admit(task.id, mask)
        };

        Ok(predecessors_clear && commutative_ready)
    }

    fn insert_access(
        &self,
        task: &Arc<TaskNode>,
        parent: Option<&Arc<TaskNode>>,
        decl: AccessDecl,
        mailbox: &mut Mailbox,
    ) -> Result<Arc<AccessState>> {
        let mut own_map = task.access_map.lock().unwrap();
        if let Some(existing) = own_map.get(decl.address) {
            let combined_kind = existing.kind.combine(decl.kind)?;
            if combined_kind != existing.kind {
                tracing::trace!(address = decl.address, "upgrading access kind to ReadWrite");
            }
            existing.or_flags(AccessFlags::empty()); // no-op beyond symbol bits; kind upgrade tracked by caller-visible type only
            return Ok(existing.clone());
        }

        let reduction_info = match (&decl.kind, decl.reduction_ops) {
            (AccessKind::Reduction, Some(ops)) => {
                Some(self.attach_reduction(task, parent, decl.address, decl.length, ops))
            }
            (AccessKind::Reduction, None) => {
                return Err(Error::Programming(
                    "reduction access declared without reduction operator".into(),
                ))
            }
            _ => None,
        };

        let access = AccessState::new(
            task.id,
            decl.address,
            decl.length,
            decl.kind,
            decl.weak,
            1u64 << decl.symbol,
            reduction_info.clone(),
        );
        if let Some(info) = &reduction_info {
            // BottomMap's own entry gets overwritten the instant a later
            // sibling (or successor) registers; `ReductionInfo` needs its
            // own durable pointer to whichever access last joined the
            // group so closing it can always forward from the right place
            // — see the doc comment on `ReductionInfo::last_access`.
            info.set_last_access(access.clone());
        }

        let starts_immediately = decl.kind == AccessKind::Reduction || decl.weak;
        if starts_immediately {
            // "weaks and reductions always start": no predecessor wait.
            access.or_flags(access.satisfied_bit());
            if decl.weak {
                // A weak access is runnable regardless of kind; mark every
                // satisfied-class bit so `is_locally_satisfied` (which
                // already special-cases weak) stays consistent if probed.
                access.or_flags(CARRY_MASK);
            }
        }

        {
            let predecessor = match parent {
                Some(parent) => {
                    let mut bottom = parent.bottom_map.lock().unwrap();
                    let found = match bottom.get(decl.address) {
                        Some(entry) => Some((entry.last_child.clone(), false, entry.open_reduction.clone())),
                        None => parent
                            .access_map
                            .lock()
                            .unwrap()
                            .get(decl.address)
                            .cloned()
                            .map(|a| (a, true, None)),
                    };
                    if let Some((pred, _, _)) = &found {
                        pred.set_successor(access.clone());
                    }
                    bottom.set(decl.address, access.clone(), reduction_info.clone());
                    // A reduction left open here closes the moment a
                    // non-reduction access follows it: no further sibling
                    // will ever join that group, so this registration is
                    // the last chance to release its baseline registration
                    // (see `close_own_reductions` for the same release on
                    // the enclosing task's own accesses). The forward, if
                    // this happens to be the release that empties the
                    // count, goes out through `ReductionInfo::last_access`,
                    // not through `last_child` here, since further
                    // siblings may already have superseded it.
                    if decl.kind != AccessKind::Reduction {
                        if let Some((_, _, Some(info))) = &found {
                            self.finish_reduction_share(info, mailbox);
                        }
                    }
                    found.map(|(pred, is_parent, _)| (pred, is_parent))
                }
                None => None,
            };

            match predecessor {
                Some((pred, is_parent_containment)) => {
                    // `pred.set_successor` already ran above, before the
                    // BottomMap entry was overwritten, so a reduction that
                    // closes right here (see above) forwards into the
                    // right place.
                    //
                    // The link from the last child in this chain back to
                    // the parent's own access (if any) is wired lazily in
                    // `close_bottom_map_entry`, once the parent task
                    // finishes and no further siblings can register.
                    if starts_immediately {
                        // Nothing to subscribe to; the predecessor's own
                        // eventual delivery will simply find no outstanding
                        // wait here and move on.
                    } else {
                        // Subscribe first, then let `deliver` resolve it
                        // immediately if it can — this keeps the two code
                        // paths (registration-time and cascade-time
                        // delivery) sharing the exact same bit-matching
                        // logic, so a predecessor whose kind only grants a
                        // partial match (e.g. a plain Read ahead of a
                        // Write) can never be mistaken for a full release.
                        task.increase_predecessors(1);
                        let may_attempt = is_parent_containment
                            || pred.kind.is_immediate_forward()
                            || pred.flags().contains(AccessFlags::UNREGISTERED);
                        if may_attempt && pred.is_locally_satisfied() {
                            self.deliver(&pred, mailbox);
                        }
                    }
                }
                None => {
                    // Root access at this address: no predecessor exists.
                    access.or_flags(access.satisfied_bit());
                }
            }
        }

        own_map.insert(decl.address, access.clone());
        Ok(access)
    }

    /// Finds the still-open `ReductionInfo` at `address` in the parent's
    /// BottomMap, if a sibling reduction already opened one, or creates a
    /// fresh one. The caller is responsible for publishing the returned
    /// info into the BottomMap entry alongside the new access, once that
    /// access exists — see the single `bottom.set` call in `insert_access`.
    fn attach_reduction(
        &self,
        _task: &Arc<TaskNode>,
        parent: Option<&Arc<TaskNode>>,
        address: usize,
        length: usize,
        ops: Arc<dyn ReductionOps>,
    ) -> Arc<ReductionInfo> {
        if let Some(parent) = parent {
            let bottom = parent.bottom_map.lock().unwrap();
            if let Some(entry) = bottom.get(address) {
                if let Some(open) = &entry.open_reduction {
                    open.register();
                    return open.clone();
                }
            }
        }
        ReductionInfo::new(address, length, ops)
    }

    /// Delivers `predecessor`'s forward message to its successor, if any,
    /// cascading through further immediate-forward accesses and recording
    /// any tasks that became ready into `mailbox`.
    fn deliver(&self, predecessor: &Arc<AccessState>, mailbox: &mut Mailbox) {
        let Some(successor) = predecessor.successor().cloned() else {
            return;
        };

        if predecessor.flags().contains(AccessFlags::NEXT_IS_PARENT) {
            successor.or_flags(AccessFlags::CHILD_DONE);
            self.maybe_dispose(&successor, mailbox);
            return;
        }

        let was_satisfied = successor.is_locally_satisfied();
        let forward = predecessor.satisfied_bit() | (predecessor.flags() & CARRY_MASK);
        successor.apply_single(forward);

        if !was_satisfied && successor.is_locally_satisfied() {
            if let Some(task) = self.node_of(successor.originator) {
                if task.decrease_predecessors(1) {
                    self.try_make_ready(&task, mailbox);
                }
            }
            if successor.kind.is_immediate_forward() {
                self.deliver(&successor, mailbox);
            }
        }
    }

    fn try_make_ready(&self, task: &Arc<TaskNode>, mailbox: &mut Mailbox) {
        let mask = self.tasks.lock().unwrap().get(&task.id).and_then(|e| e.commutative_mask);
        let commutative_ok = match mask {
            // All other predecessors just cleared; this is the first
            // point at which admission can be attempted for this task.
            Some(mask) => self.commutative.try_admit(task.id, mask),
            None => true,
        };
        if commutative_ok {
            mailbox.ready.push(task.id);
        }
    }

    fn drain_mailbox(&self, mut mailbox: Mailbox) {
        for id in mailbox.drain_ready() {
            (self.on_ready)(id);
        }
        for id in mailbox.drain_deletable() {
            (self.on_disposable)(id);
        }
    }

    /// Finalizes every access owned by `task` (body finished, or release
    /// clause for a region). See SPEC_FULL.md §4.6 `finalize`.
    pub fn finalize(&self, task: &Arc<TaskNode>) -> Result<()> {
        let mut mailbox = Mailbox::new();
        let accesses: Vec<_> = task.access_map.lock().unwrap().for_all().cloned().collect();

        for access in &accesses {
            access.mark_unregistered();
            if access.kind == AccessKind::Reduction {
                // Usually just releases this child's own share; the group
                // combines once the enclosing task's `close_own_reductions`
                // (or a following non-reduction access) releases the
                // baseline. But nothing stops this particular child from
                // being the one that empties the count, if it happens to
                // be the last sibling to finish — so it must check too.
                if let Some(info) = &access.reduction_info {
                    self.finish_reduction_share(info, &mut mailbox);
                }
            } else {
                self.deliver(access, &mut mailbox);
            }
            self.maybe_dispose(access, &mut mailbox);
        }

        self.close_own_reductions(task, &mut mailbox);
        for access in &accesses {
            self.close_bottom_map_entry(task, access.region_start, &mut mailbox);
        }

        if let Some(parent_id) = task.parent {
            if let Some(parent) = self.node_of(parent_id) {
                for access in &accesses {
                    access.mark_parent_done();
                    self.maybe_dispose(access, &mut mailbox);
                }
                if parent.finish_child() {
                    mailbox.ready.push(parent.id);
                }
            }
        } else {
            for access in &accesses {
                access.mark_parent_done();
                self.maybe_dispose(access, &mut mailbox);
            }
        }

        self.drain_mailbox(mailbox);
        Ok(())
    }

    fn maybe_dispose(&self, access: &Arc<AccessState>, mailbox: &mut Mailbox) {
        if access.is_disposable() {
            mailbox.deletable.push(access.originator);
        }
    }

    /// Unregisters one share of a reduction. Whichever of the many call
    /// sites (each sibling access's own `finalize`/`release_access`, the
    /// enclosing task's baseline release in `close_own_reductions`, or the
    /// inline close in `insert_access` when a later access supersedes an
    /// open one) happens to bring the count to zero combines the reduction
    /// and forwards completion through `info.last_access()` — never through
    /// `self`, since `self` need not be the access any real successor is
    /// actually chained behind.
    fn finish_reduction_share(&self, info: &Arc<ReductionInfo>, mailbox: &mut Mailbox) {
        if info.unregister() {
            info.combine();
            if let Some(last) = info.last_access() {
                last.mark_reduction_combined();
                self.deliver(&last, mailbox);
            }
        }
    }

    /// Releases the baseline (+1) registration a reduction's `ReductionInfo`
    /// has carried since the BottomMap entry first opened (see that type's
    /// doc comment on why the counter starts at 2), for every reduction
    /// still open in `task`'s own BottomMap. Called from both `finalize`
    /// and `taskwait` entry, for whichever addresses a later, non-reduction
    /// access never followed (see the inline close in `insert_access` for
    /// that other trigger).
    fn close_own_reductions(&self, task: &Arc<TaskNode>, mailbox: &mut Mailbox) {
        let mut bottom = task.bottom_map.lock().unwrap();
        let to_close: Vec<_> = bottom.open_reductions().map(|(addr, info)| (addr, info.clone())).collect();
        for (addr, info) in to_close {
            self.finish_reduction_share(&info, mailbox);
            bottom.clear_reduction(addr);
        }
    }

    /// Wires the last child access registered at `address` (if any) back to
    /// `task`'s own access there, so `task`'s access cannot be disposed of
    /// until that whole child chain reports done. Called once `task` is
    /// finished registering new nested accesses at `address`, which is why
    /// `finalize` and `release_access` are the only callers: no further
    /// sibling can appear in the BottomMap after either runs.
    fn close_bottom_map_entry(&self, task: &Arc<TaskNode>, address: usize, mailbox: &mut Mailbox) {
        let entry = {
            let mut bottom = task.bottom_map.lock().unwrap();
            let entry = bottom.get(address).cloned();
            if entry.is_some() {
                bottom.remove(address);
            }
            entry
        };
        let Some(entry) = entry else { return };
        if entry.open_reduction.is_some() {
            return;
        }
        let pred = task.access_map.lock().unwrap().get(address).cloned();
        let Some(pred) = pred else { return };
        pred.mark_has_child();
        entry.last_child.set_successor(pred);
        entry.last_child.mark_next_is_parent();
        if entry.last_child.flags().contains(AccessFlags::UNREGISTERED) {
            self.deliver(&entry.last_child, mailbox);
        }
    }

    /// `taskwait(current)`. See SPEC_FULL.md §4.7.
    pub fn taskwait(&self, task: &Arc<TaskNode>) -> TaskwaitOutcome {
        if task.does_not_need_to_block_for_children() && task.children_countdown() == 1 {
            return TaskwaitOutcome::Ready;
        }
        let mut mailbox = Mailbox::new();
        self.close_own_reductions(task, &mut mailbox);
        self.drain_mailbox(mailbox);
        if task.decrement_children_countdown() {
            // Restore the "not blocked" credit consumed above so a later
            // taskwait call on this same task starts from the same
            // baseline as this one did.
            task.restore_taskwait_credit();
            TaskwaitOutcome::Ready
        } else {
            TaskwaitOutcome::MustPause
        }
    }

    /// Resumes a task that paused in `taskwait`. `handleExitTaskwait` is a
    /// no-op in the reference implementation beyond restoring the credit
    /// consumed on entry, for the same reason the `Ready` branch above
    /// does: so a subsequent taskwait call on this task works correctly.
    pub fn taskwait_resume(&self, task: &Arc<TaskNode>) {
        task.restore_taskwait_credit();
    }

    /// `release(task, address, kind, weak)`: drops one access before the
    /// task's own body ends. Requires an exact kind/weakness match.
    pub fn release_access(&self, task: &Arc<TaskNode>, address: usize, kind: AccessKind, weak: bool) -> Result<()> {
        let access = {
            let map = task.access_map.lock().unwrap();
            map.get(address).cloned()
        };
        let Some(access) = access else {
            return Err(Error::Programming(format!(
                "release of address {address:#x} that was never declared"
            )));
        };
        if access.kind != kind || access.weak != weak {
            return Err(Error::Programming(format!(
                "release kind/weakness mismatch at {address:#x}: declared {:?}/weak={}, released {:?}/weak={}",
                access.kind, access.weak, kind, weak
            )));
        }
        let mut mailbox = Mailbox::new();
        if let Some(info) = &access.reduction_info {
            // As in `finalize`, this usually only releases this one
            // access's share, but checks in case it empties the count.
            self.finish_reduction_share(info, &mut mailbox);
        }
        access.mark_unregistered();
        self.close_bottom_map_entry(task, address, &mut mailbox);
        access.mark_parent_done();
        if kind != AccessKind::Reduction {
            self.deliver(&access, &mut mailbox);
        }
        self.maybe_dispose(&access, &mut mailbox);
        self.drain_mailbox(mailbox);
        Ok(())
    }

    /// Releases a non-weak commutative mask previously admitted for
    /// `task`, waking any newly-compatible waiters.
    pub fn release_commutative(&self, task: &Arc<TaskNode>) {
        let mask = self.tasks.lock().unwrap().get(&task.id).and_then(|e| e.commutative_mask);
        if let Some(mask) = mask {
            let admitted = self.commutative.release(mask);
            for id in admitted {
                (self.on_ready)(id);
            }
        }
    }
}

impl AccessKind {
    /// Read and Concurrent accesses forward their satisfaction to the next
    /// access as soon as they become satisfied themselves, without waiting
    /// for their own task body to run — siblings of these kinds never
    /// serialize on each other.
    pub fn is_immediate_forward(self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::Concurrent)
    }
}
