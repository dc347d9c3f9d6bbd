//! End-to-end scenarios from SPEC_FULL.md §8, driven over a small
//! test-only thread-pool harness (the real executor collaborator lives in
//! the `depexec` crate; these tests only need enough of one to prove the
//! dependency core's scheduling decisions are correct).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use depcore::access::AccessKind;
use depcore::reduction::TypedReduction;
use depcore::task::{TaskFlags, TaskId, TaskNode};
use depcore::{AccessDecl, DependencySystem, TaskwaitOutcome};

type Job = Box<dyn FnOnce(&Arc<Harness>, &Arc<TaskNode>) + Send>;

thread_local! {
    /// The stable index of the worker thread currently running a job, set
    /// once when the thread starts. Reduction bodies use this (not the
    /// task's position in its submission loop) to pick their per-worker
    /// slot, since the whole point of a per-worker slot is that it is
    /// touched only by the thread it belongs to.
    static CURRENT_WORKER: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

struct Wake {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Wake {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn notify(&self) {
        *self.done.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
        *done = false;
    }
}

/// Minimal thread-pool-backed executor stand-in. Workers pull ready tasks
/// from a FIFO queue and run their job closure; a job calls back into the
/// harness to register children and/or taskwait.
struct Harness {
    system: DependencySystem,
    queue: Mutex<VecDeque<TaskId>>,
    queue_cv: Condvar,
    jobs: Mutex<HashMap<TaskId, Job>>,
    nodes: Mutex<HashMap<TaskId, Arc<TaskNode>>>,
    wakers: Mutex<HashMap<TaskId, Arc<Wake>>>,
    live: AtomicUsize,
}

impl Harness {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Harness>| {
            let on_ready_weak = weak.clone();
            let on_disposable_weak = weak.clone();
            Harness {
                system: DependencySystem::new(
                    move |id| {
                        if let Some(h) = on_ready_weak.upgrade() {
                            h.handle_ready(id);
                        }
                    },
                    move |_id| {
                        let _ = &on_disposable_weak;
                    },
                ),
                queue: Mutex::new(VecDeque::new()),
                queue_cv: Condvar::new(),
                jobs: Mutex::new(HashMap::new()),
                nodes: Mutex::new(HashMap::new()),
                wakers: Mutex::new(HashMap::new()),
                live: AtomicUsize::new(0),
            }
        })
    }

    fn handle_ready(&self, id: TaskId) {
        let started = self.nodes.lock().unwrap().get(&id).map(|n| n.has_started()).unwrap_or(false);
        if started {
            // This is a taskwait wake-up, not an initial dispatch.
            if let Some(w) = self.wakers.lock().unwrap().get(&id) {
                w.notify();
            }
            return;
        }
        self.queue.lock().unwrap().push_back(id);
        self.queue_cv.notify_all();
    }

    fn submit(self: &Arc<Self>, task: &Arc<TaskNode>, job: Job, ready_now: bool) {
        self.nodes.lock().unwrap().insert(task.id, task.clone());
        self.jobs.lock().unwrap().insert(task.id, job);
        self.live.fetch_add(1, Ordering::SeqCst);
        if ready_now {
            self.queue.lock().unwrap().push_back(task.id);
            self.queue_cv.notify_all();
        }
    }

    fn taskwait(self: &Arc<Self>, task: &Arc<TaskNode>) {
        // Register the waker before decrementing so a concurrent child
        // finishing between the decrement and the registration can never
        // drop the wake-up on the floor.
        let waker = Wake::new();
        self.wakers.lock().unwrap().insert(task.id, waker.clone());
        match self.system.taskwait(task) {
            TaskwaitOutcome::Ready => {}
            TaskwaitOutcome::MustPause => {
                waker.wait();
                self.system.taskwait_resume(task);
            }
        }
        self.wakers.lock().unwrap().remove(&task.id);
    }

    fn run_workers(self: &Arc<Self>, count: usize) {
        let handles = self.spawn_workers(count);
        Self::join_workers(handles);
    }

    fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<std::thread::JoinHandle<()>> {
        (0..count)
            .map(|idx| {
                let h = self.clone();
                std::thread::spawn(move || {
                    CURRENT_WORKER.with(|w| w.set(idx));
                    h.worker_loop()
                })
            })
            .collect()
    }

    fn join_workers(handles: Vec<std::thread::JoinHandle<()>>) {
        for handle in handles {
            handle.join().unwrap();
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let id = {
                let mut queue = self.queue.lock().unwrap();
                loop {
                    if let Some(id) = queue.pop_front() {
                        break Some(id);
                    }
                    if self.live.load(Ordering::SeqCst) == 0 {
                        break None;
                    }
                    let (q, timeout) = self
                        .queue_cv
                        .wait_timeout(queue, std::time::Duration::from_millis(50))
                        .unwrap();
                    queue = q;
                    if timeout.timed_out() && queue.is_empty() && self.live.load(Ordering::SeqCst) == 0 {
                        break None;
                    }
                }
            };
            let Some(id) = id else { break };
            let job = self.jobs.lock().unwrap().remove(&id);
            let Some(job) = job else { continue };
            let node = self.nodes.lock().unwrap().get(&id).cloned().unwrap();
            node.mark_started();
            job(&self, &node);
            node.mark_finished();
            self.system.finalize(&node).expect("finalize");
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.queue_cv.notify_all();
        }
    }

    fn wait_idle(&self) {
        // Workers exit once `live` drops to zero and the queue is empty;
        // `run_workers` already joins them, so nothing else to do here.
    }
}

// ---------------------------------------------------------------------
// Scenario 1: fibonacci via taskwait.
// ---------------------------------------------------------------------

fn fib_body(h: &Arc<Harness>, task: &Arc<TaskNode>, n: u64, out: Arc<AtomicI64>) {
    if n < 2 {
        out.store(n as i64, Ordering::SeqCst);
        return;
    }
    let left = Arc::new(AtomicI64::new(0));
    let right = Arc::new(AtomicI64::new(0));

    let left_task = h.system.create_task(Some(task), TaskFlags::empty());
    {
        let left_out = left.clone();
        let h2 = h.clone();
        let ready = h
            .system
            .register(&left_task, Some(task), vec![])
            .expect("register");
        h.submit(
            &left_task,
            Box::new(move |h, t| fib_body(h, t, n - 1, left_out)),
            ready,
        );
        let _ = h2;
    }

    let right_task = h.system.create_task(Some(task), TaskFlags::empty());
    {
        let right_out = right.clone();
        let ready = h
            .system
            .register(&right_task, Some(task), vec![])
            .expect("register");
        h.submit(
            &right_task,
            Box::new(move |h, t| fib_body(h, t, n - 2, right_out)),
            ready,
        );
    }

    h.taskwait(task);
    out.store(left.load(Ordering::SeqCst) + right.load(Ordering::SeqCst), Ordering::SeqCst);
}

#[test]
fn fibonacci_via_taskwait() {
    let h = Harness::new();
    let root = h.system.create_task(None, TaskFlags::empty());
    let result = Arc::new(AtomicI64::new(0));
    let ready = h.system.register(&root, None, vec![]).expect("register");
    let out = result.clone();
    h.submit(&root, Box::new(move |h, t| fib_body(h, t, 14, out)), ready);
    h.run_workers(4);
    h.wait_idle();
    assert_eq!(result.load(Ordering::SeqCst), 377);
}

// ---------------------------------------------------------------------
// Scenario 2: reduction sum.
// ---------------------------------------------------------------------

fn reduction_sum(worker_count: usize) {
    let h = Harness::new();
    let mut total: i64 = 0;
    let addr = &mut total as *mut i64 as usize;

    let root = h.system.create_task(None, TaskFlags::empty());
    h.system.register(&root, None, vec![]).expect("register");
    h.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();

    let ops = TypedReduction::new(|| 0i64, |a: i64, b: i64| a + b);
    for _ in 0..1000 {
        let child = h.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Reduction, addr, 1).reduction(ops.clone());
        let ready = h.system.register(&child, Some(&root), vec![decl]).expect("register");
        h.submit(
            &child,
            Box::new(move |_h, t| {
                let info = {
                    let map = t.access_map.lock().unwrap();
                    map.get(addr).unwrap().reduction_info.clone().unwrap()
                };
                let worker_id = CURRENT_WORKER.with(|w| w.get());
                let slot = info.get_free_slot(worker_id) as *mut i64;
                unsafe {
                    *slot += 1;
                }
            }),
            ready,
        );
    }

    let observed = Arc::new(AtomicI64::new(-1));
    let successor = h.system.create_task(Some(&root), TaskFlags::empty());
    let decl = AccessDecl::new(AccessKind::Read, addr, 1);
    let ready = h.system.register(&successor, Some(&root), vec![decl]).expect("register");
    let obs = observed.clone();
    h.submit(
        &successor,
        Box::new(move |_h, _t| {
            obs.store(unsafe { *(addr as *const i64) }, Ordering::SeqCst);
        }),
        ready,
    );

    let handles = h.spawn_workers(worker_count.max(1));
    h.taskwait(&root);
    root.mark_finished();
    h.system.finalize(&root).expect("finalize root");
    Harness::join_workers(handles);
    assert_eq!(observed.load(Ordering::SeqCst), 1000);
}

#[test]
fn reduction_sum_single_worker() {
    reduction_sum(1);
}

#[test]
fn reduction_sum_multi_worker() {
    reduction_sum(4);
}

// ---------------------------------------------------------------------
// Scenario 4: commutative admission.
// ---------------------------------------------------------------------

#[test]
fn commutative_admission_serializes_critical_region() {
    let h = Harness::new();
    let mut counter: i64 = 0;
    let addr = &mut counter as *mut i64 as usize;
    let in_region = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));

    let n = num_cpus_fallback();
    let root = h.system.create_task(None, TaskFlags::empty());
    h.system.register(&root, None, vec![]).expect("register");
    h.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();

    for _ in 0..n {
        let child = h.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Commutative, addr, std::mem::size_of::<i64>());
        let ready = h.system.register(&child, Some(&root), vec![decl]).expect("register");
        let in_region = in_region.clone();
        let max_observed = max_observed.clone();
        let child_for_release = child.clone();
        let h_weak = h.clone();
        h.submit(
            &child,
            Box::new(move |_h, _t| {
                let now = in_region.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                unsafe {
                    *(addr as *mut i64) += 1;
                }
                in_region.fetch_sub(1, Ordering::SeqCst);
                h_weak.system.release_commutative(&child_for_release);
            }),
            ready,
        );
    }

    let handles = h.spawn_workers(n);
    h.taskwait(&root);
    root.mark_finished();
    h.system.finalize(&root).expect("finalize root");
    Harness::join_workers(handles);

    assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    assert_eq!(counter, n as i64);
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).max(2)
}

// ---------------------------------------------------------------------
// Scenario 3: release and early consumers.
//
// A producer declares `out(v[0..8))`, then releases each element in a
// random-ish permutation while still running; eight single-element
// consumer tasks, one per index, must each become ready as soon as (and
// only as soon as) their own element is released rather than waiting for
// the whole producer to finish.
// ---------------------------------------------------------------------

#[test]
fn release_unblocks_consumers_per_element_not_whole_task() {
    let h = Harness::new();
    let mut v = [0i64; 8];
    let base = v.as_mut_ptr() as usize;
    let elem = std::mem::size_of::<i64>();

    // A common enclosing scope is required for the producer and its
    // consumers to chain: the BottomMap that links same-address accesses
    // together lives on whichever task is their shared parent.
    let root = h.system.create_task(None, TaskFlags::empty());
    h.system.register(&root, None, vec![]).expect("register root");
    h.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();

    let producer = h.system.create_task(Some(&root), TaskFlags::empty());
    let decls: Vec<_> = (0..8)
        .map(|i| AccessDecl::new(AccessKind::Write, base + i * elem, elem))
        .collect();
    let ready = h.system.register(&producer, Some(&root), decls).expect("register producer");
    assert!(ready, "producer has no predecessors and must be immediately runnable");
    h.nodes.lock().unwrap().insert(producer.id, producer.clone());

    let observed: Vec<Arc<AtomicI64>> = (0..8).map(|_| Arc::new(AtomicI64::new(-1))).collect();
    let mut consumers = Vec::new();
    for i in 0..8usize {
        let consumer = h.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Read, base + i * elem, elem);
        let consumer_ready = h
            .system
            .register(&consumer, Some(&root), vec![decl])
            .expect("register consumer");
        assert!(!consumer_ready, "consumer must wait on the producer's still-open write");
        let out = observed[i].clone();
        h.submit(
            &consumer,
            Box::new(move |_h, _t| {
                out.store(unsafe { *((base + i * elem) as *const i64) }, Ordering::SeqCst);
            }),
            false,
        );
        consumers.push(consumer);
    }

    // Release in reverse order: index 7 first, index 0 last.
    producer.mark_started();
    let handles = h.spawn_workers(2);
    for i in (0..8usize).rev() {
        v[i] = 100 + i as i64;
        h.system
            .release_access(&producer, base + i * elem, AccessKind::Write, false)
            .expect("release element");
    }
    producer.mark_finished();
    h.system.finalize(&producer).expect("finalize producer");

    h.taskwait(&root);
    root.mark_finished();
    h.system.finalize(&root).expect("finalize root");
    Harness::join_workers(handles);

    for (i, slot) in observed.iter().enumerate() {
        assert_eq!(slot.load(Ordering::SeqCst), 100 + i as i64, "consumer {i} saw stale value");
    }
}

// ---------------------------------------------------------------------
// Scenario 5: taskiter-for equivalence.
//
// The core exposes no "taskiter" construct (out of scope, see
// SPEC_FULL.md §4.10); a plain loop of ordinary `register`/`taskwait`
// calls over the same inout region must still converge to the same
// result a locality-optimized taskiter would produce. Each of 100
// iterations spawns two inout tasks over the whole of `a[0..50)`; since
// both declare the same region with the same kind, the second of each
// pair's registration chains behind the first, and the next iteration's
// pair chains behind both, so every increment lands exactly once per
// task in program order.
// ---------------------------------------------------------------------

#[test]
fn taskiter_for_equivalence_via_plain_register_loop() {
    const ITERATIONS: usize = 100;
    const LEN: usize = 50;

    let h = Harness::new();
    let mut a = [0i64; LEN];
    let base = a.as_mut_ptr() as usize;
    let span = LEN * std::mem::size_of::<i64>();

    let root = h.system.create_task(None, TaskFlags::empty());
    h.system.register(&root, None, vec![]).expect("register root");
    h.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();

    let handles = h.spawn_workers(4);

    for _ in 0..ITERATIONS {
        for _ in 0..2 {
            let task = h.system.create_task(Some(&root), TaskFlags::empty());
            let decl = AccessDecl::new(AccessKind::ReadWrite, base, span);
            let ready = h.system.register(&task, Some(&root), vec![decl]).expect("register");
            h.submit(
                &task,
                Box::new(move |_h, _t| {
                    let slice = unsafe { std::slice::from_raw_parts_mut(base as *mut i64, LEN) };
                    for x in slice.iter_mut() {
                        *x += 1;
                    }
                }),
                ready,
            );
        }
    }

    h.taskwait(&root);
    root.mark_finished();
    h.system.finalize(&root).expect("finalize root");
    Harness::join_workers(handles);

    for (j, value) in a.iter().enumerate() {
        assert_eq!(*value, 2 * ITERATIONS as i64, "a[{j}] diverged from program order");
    }
}

// ---------------------------------------------------------------------
// Scenario 6: discrete chain with early release.
//
// A parent task declares `in(v1), out(v2)`, spawns a child that writes
// `v2`, then releases `v1` and finishes before the child has necessarily
// finished. A sibling declaring `out(v1)` may start as soon as the
// parent releases `v1`, independent of when the child finishes with
// `v2`.
// ---------------------------------------------------------------------

#[test]
fn discrete_chain_with_early_release_lets_sibling_start_before_child_finishes() {
    let h = Harness::new();
    let mut v1 = 1i64;
    let mut v2 = 2i64;
    let addr1 = &mut v1 as *mut i64 as usize;
    let addr2 = &mut v2 as *mut i64 as usize;

    // `parent` and `sibling` are both children of `root`, so their shared
    // access to `v1` chains through `root`'s BottomMap.
    let root = h.system.create_task(None, TaskFlags::empty());
    h.system.register(&root, None, vec![]).expect("register root");
    h.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();

    let parent = h.system.create_task(Some(&root), TaskFlags::empty());
    let decls = vec![
        AccessDecl::new(AccessKind::Read, addr1, 8),
        AccessDecl::new(AccessKind::Write, addr2, 8),
    ];
    let ready = h.system.register(&parent, Some(&root), decls).expect("register parent");
    assert!(ready);
    h.nodes.lock().unwrap().insert(parent.id, parent.clone());
    parent.mark_started();

    let child_gate = Arc::new(Wake::new());
    let child = h.system.create_task(Some(&parent), TaskFlags::empty());
    let child_decl = AccessDecl::new(AccessKind::Write, addr2, 8);
    let child_ready = h
        .system
        .register(&child, Some(&parent), vec![child_decl])
        .expect("register child");
    assert!(child_ready, "child inherits the parent's already-satisfied write on v2");
    let gate = child_gate.clone();
    h.submit(
        &child,
        Box::new(move |_h, _t| {
            gate.wait();
            unsafe {
                *(addr2 as *mut i64) = 42;
            }
        }),
        child_ready,
    );

    let sibling_started = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let sibling = h.system.create_task(Some(&root), TaskFlags::empty());
    let sibling_decl = AccessDecl::new(AccessKind::Write, addr1, 8);
    let sibling_ready = h
        .system
        .register(&sibling, Some(&root), vec![sibling_decl])
        .expect("register sibling");
    assert!(!sibling_ready, "sibling must wait for the parent's still-open read on v1");
    let started_flag = sibling_started.clone();
    h.submit(
        &sibling,
        Box::new(move |_h, _t| {
            started_flag.store(true, Ordering::SeqCst);
        }),
        false,
    );

    let handles = h.spawn_workers(2);

    h.system
        .release_access(&parent, addr1, AccessKind::Read, false)
        .expect("release v1");

    // Give the worker pool a chance to pick up and run the now-ready
    // sibling while the child is still parked on its own gate.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while !sibling_started.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
        std::thread::yield_now();
    }
    assert!(sibling_started.load(Ordering::SeqCst), "sibling never ran after v1 was released");
    assert!(!child.has_finished(), "child must still be blocked on its own gate");

    child_gate.notify();
    parent.mark_finished();
    h.system.finalize(&parent).expect("finalize parent");

    h.taskwait(&root);
    root.mark_finished();
    h.system.finalize(&root).expect("finalize root");
    Harness::join_workers(handles);

    assert_eq!(unsafe { *(addr2 as *const i64) }, 42);
}
