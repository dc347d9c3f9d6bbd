//! CLI driver exercising the dependency runtime's end-to-end scenarios
//! from SPEC_FULL.md §8, the way the teacher's own CLI entry point
//! exercises its library crates from a thin `bin/` binary. Talks to
//! `depcore` directly (not through `depabi`'s C surface) and uses
//! `depexec`'s worker pool for real concurrent execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depcore::access::AccessKind;
use depcore::reduction::TypedReduction;
use depcore::task::{TaskFlags, TaskId, TaskNode};
use depcore::{AccessDecl, DependencySystem, TaskwaitOutcome};
use depexec::{Config, Executor, PauseTable};

#[derive(Parser)]
#[command(name = "demo", about = "Exercises the dependency runtime's end-to-end scenarios")]
struct Cli {
    #[command(subcommand)]
    scenario: Scenario,

    /// Worker thread count. Defaults to the number of available cores.
    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Scenario {
    /// Fibonacci(14) computed via nested tasks and taskwait.
    Fibonacci {
        #[arg(long, default_value_t = 14)]
        n: u64,
    },
    /// Sum 1000 reduction contributions into a single accumulator.
    ReductionSum,
    /// 2*N tasks contend on one commutative region; admission serializes them.
    Commutative,
    /// A producer releases elements of an array out of order; consumers
    /// must wake per-element, not at whole-task finalization.
    Release,
    /// A plain register/taskwait loop converges to the same result a
    /// taskiter-for would, since the core implements no such construct.
    Taskiter,
    /// A child's write chains behind a released read, independent of a
    /// sibling's own completion.
    DiscreteChain,
    /// Runs every scenario in sequence.
    All,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let workers = cli.workers.unwrap_or_else(|| num_cpus::get().max(1));

    match cli.scenario {
        Scenario::Fibonacci { n } => run_fibonacci(workers, n),
        Scenario::ReductionSum => run_reduction_sum(workers),
        Scenario::Commutative => run_commutative(workers),
        Scenario::Release => run_release(workers),
        Scenario::Taskiter => run_taskiter(workers),
        Scenario::DiscreteChain => run_discrete_chain(workers),
        Scenario::All => {
            run_fibonacci(workers, 14);
            run_reduction_sum(workers);
            run_commutative(workers);
            run_release(workers);
            run_taskiter(workers);
            run_discrete_chain(workers);
        }
    }
}

type Job = Box<dyn FnOnce(&Arc<Demo>, &Arc<TaskNode>) + Send>;

/// Ties `depcore`'s dependency system to `depexec`'s worker pool: ready
/// tasks that have never run are submitted to the executor; ready tasks
/// that have already started (a `taskwait` waking up) go through the
/// pause table instead.
struct Demo {
    system: DependencySystem,
    executor: Executor,
    pause_table: Arc<PauseTable>,
    jobs: Mutex<HashMap<TaskId, Job>>,
    nodes: Mutex<HashMap<TaskId, Arc<TaskNode>>>,
}

impl Demo {
    fn new(worker_count: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Demo>| {
            let ready_weak = weak.clone();
            let system = DependencySystem::new(
                move |id| {
                    if let Some(demo) = ready_weak.upgrade() {
                        demo.handle_ready(id);
                    }
                },
                |_id| {},
            );
            let executor = Executor::start(Config {
                worker_count,
                thread_name_prefix: "demo-worker".to_string(),
            });
            Demo {
                system,
                executor,
                pause_table: Arc::new(PauseTable::new()),
                jobs: Mutex::new(HashMap::new()),
                nodes: Mutex::new(HashMap::new()),
            }
        })
    }

    fn handle_ready(self: &Arc<Self>, id: TaskId) {
        let started = self.nodes.lock().unwrap().get(&id).map(|n| n.has_started()).unwrap_or(false);
        if started {
            self.pause_table.wake(id);
        } else {
            self.dispatch(id);
        }
    }

    fn submit(self: &Arc<Self>, task: &Arc<TaskNode>, job: Job, ready_now: bool) {
        self.nodes.lock().unwrap().insert(task.id, task.clone());
        self.jobs.lock().unwrap().insert(task.id, job);
        if ready_now {
            self.dispatch(task.id);
        }
    }

    fn dispatch(self: &Arc<Self>, id: TaskId) {
        let demo = self.clone();
        let _ = self.executor.submit(Box::new(move || demo.run(id)));
    }

    fn run(self: &Arc<Self>, id: TaskId) {
        let job = self.jobs.lock().unwrap().remove(&id);
        let Some(job) = job else { return };
        let node = self.nodes.lock().unwrap().get(&id).cloned().unwrap();
        node.mark_started();
        job(self, &node);
        node.mark_finished();
        self.system.finalize(&node).expect("finalize");
    }

    fn taskwait(self: &Arc<Self>, task: &Arc<TaskNode>) {
        match self.system.taskwait(task) {
            TaskwaitOutcome::Ready => {}
            TaskwaitOutcome::MustPause => {
                self.pause_table.park(task.id);
                self.system.taskwait_resume(task);
            }
        }
    }

    /// Shuts the worker pool down once a scenario's root has fully
    /// finalized.
    fn shutdown(demo: &Arc<Self>) {
        demo.executor.shutdown();
    }
}

fn root_task(demo: &Arc<Demo>) -> Arc<TaskNode> {
    let root = demo.system.create_task(None, TaskFlags::empty());
    demo.system.register(&root, None, vec![]).expect("register root");
    demo.nodes.lock().unwrap().insert(root.id, root.clone());
    root.mark_started();
    root
}

fn finish_root(demo: &Arc<Demo>, root: &Arc<TaskNode>) {
    demo.taskwait(root);
    root.mark_finished();
    demo.system.finalize(root).expect("finalize root");
}

// ---------------------------------------------------------------------
// Scenario 1: fibonacci via taskwait.
// ---------------------------------------------------------------------

fn fib_body(demo: &Arc<Demo>, task: &Arc<TaskNode>, n: u64, out: Arc<AtomicI64>) {
    if n < 2 {
        out.store(n as i64, Ordering::SeqCst);
        return;
    }
    let left = Arc::new(AtomicI64::new(0));
    let right = Arc::new(AtomicI64::new(0));

    let left_task = demo.system.create_task(Some(task), TaskFlags::empty());
    let left_out = left.clone();
    let ready = demo.system.register(&left_task, Some(task), vec![]).expect("register");
    demo.submit(&left_task, Box::new(move |d, t| fib_body(d, t, n - 1, left_out)), ready);

    let right_task = demo.system.create_task(Some(task), TaskFlags::empty());
    let right_out = right.clone();
    let ready = demo.system.register(&right_task, Some(task), vec![]).expect("register");
    demo.submit(&right_task, Box::new(move |d, t| fib_body(d, t, n - 2, right_out)), ready);

    demo.taskwait(task);
    out.store(left.load(Ordering::SeqCst) + right.load(Ordering::SeqCst), Ordering::SeqCst);
}

fn run_fibonacci(workers: usize, n: u64) {
    let demo = Demo::new(workers);
    let root = root_task(&demo);
    let result = Arc::new(AtomicI64::new(0));
    let out = result.clone();
    demo.submit(&root, Box::new(move |d, t| fib_body(d, t, n, out)), true);
    finish_root(&demo, &root);
    println!("fibonacci({n}) = {}", result.load(Ordering::SeqCst));
    Demo::shutdown(&demo);
}

// ---------------------------------------------------------------------
// Scenario 2: reduction sum.
// ---------------------------------------------------------------------

fn run_reduction_sum(workers: usize) {
    let demo = Demo::new(workers);
    let mut total: i64 = 0;
    let addr = &mut total as *mut i64 as usize;
    let root = root_task(&demo);

    let ops = TypedReduction::new(|| 0i64, |a: i64, b: i64| a + b);
    for _ in 0..1000usize {
        let child = demo.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Reduction, addr, 1).reduction(ops.clone());
        let ready = demo.system.register(&child, Some(&root), vec![decl]).expect("register");
        demo.submit(
            &child,
            Box::new(move |_d, t| {
                let info = {
                    let map = t.access_map.lock().unwrap();
                    map.get(addr).unwrap().reduction_info.clone().unwrap()
                };
                let worker_id = depexec::current_worker_id().unwrap_or(0);
                let slot = info.get_free_slot(worker_id) as *mut i64;
                unsafe { *slot += 1 };
            }),
            ready,
        );
    }

    let observed = Arc::new(AtomicI64::new(-1));
    let successor = demo.system.create_task(Some(&root), TaskFlags::empty());
    let decl = AccessDecl::new(AccessKind::Read, addr, 1);
    let ready = demo.system.register(&successor, Some(&root), vec![decl]).expect("register");
    let obs = observed.clone();
    demo.submit(
        &successor,
        Box::new(move |_d, _t| obs.store(unsafe { *(addr as *const i64) }, Ordering::SeqCst)),
        ready,
    );

    finish_root(&demo, &root);
    println!("reduction sum over 1000 contributions = {}", observed.load(Ordering::SeqCst));
    Demo::shutdown(&demo);
}

// ---------------------------------------------------------------------
// Scenario 4: commutative admission.
// ---------------------------------------------------------------------

fn run_commutative(workers: usize) {
    let demo = Demo::new(workers);
    let mut counter: i64 = 0;
    let addr = &mut counter as *mut i64 as usize;
    let in_region = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));
    let n = workers.max(2);

    let root = root_task(&demo);
    for _ in 0..n {
        let child = demo.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Commutative, addr, std::mem::size_of::<i64>());
        let ready = demo.system.register(&child, Some(&root), vec![decl]).expect("register");
        let in_region = in_region.clone();
        let max_observed = max_observed.clone();
        let child_for_release = child.clone();
        demo.submit(
            &child,
            Box::new(move |d, _t| {
                let now = in_region.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                unsafe { *(addr as *mut i64) += 1 };
                in_region.fetch_sub(1, Ordering::SeqCst);
                d.system.release_commutative(&child_for_release);
            }),
            ready,
        );
    }

    finish_root(&demo, &root);
    println!(
        "commutative admission: max concurrent = {}, final counter = {}",
        max_observed.load(Ordering::SeqCst),
        counter
    );
    Demo::shutdown(&demo);
}

// ---------------------------------------------------------------------
// Scenario 3: release unblocks consumers per element.
// ---------------------------------------------------------------------

fn run_release(workers: usize) {
    let demo = Demo::new(workers);
    let mut v = [0i64; 8];
    let base = v.as_mut_ptr() as usize;
    let elem = std::mem::size_of::<i64>();
    let root = root_task(&demo);

    let producer = demo.system.create_task(Some(&root), TaskFlags::empty());
    let decls: Vec<_> = (0..8).map(|i| AccessDecl::new(AccessKind::Write, base + i * elem, elem)).collect();
    demo.system.register(&producer, Some(&root), decls).expect("register producer");
    demo.nodes.lock().unwrap().insert(producer.id, producer.clone());
    producer.mark_started();

    let observed: Vec<Arc<AtomicI64>> = (0..8).map(|_| Arc::new(AtomicI64::new(-1))).collect();
    for i in 0..8usize {
        let consumer = demo.system.create_task(Some(&root), TaskFlags::empty());
        let decl = AccessDecl::new(AccessKind::Read, base + i * elem, elem);
        let ready = demo.system.register(&consumer, Some(&root), vec![decl]).expect("register consumer");
        let out = observed[i].clone();
        demo.submit(
            &consumer,
            Box::new(move |_d, _t| out.store(unsafe { *((base + i * elem) as *const i64) }, Ordering::SeqCst)),
            ready,
        );
    }

    for i in (0..8usize).rev() {
        v[i] = 100 + i as i64;
        demo.system.release_access(&producer, base + i * elem, AccessKind::Write, false).expect("release element");
    }
    producer.mark_finished();
    demo.system.finalize(&producer).expect("finalize producer");

    finish_root(&demo, &root);
    for (i, slot) in observed.iter().enumerate() {
        println!("consumer[{i}] observed {}", slot.load(Ordering::SeqCst));
    }
    Demo::shutdown(&demo);
}

// ---------------------------------------------------------------------
// Scenario 5: taskiter-for equivalence via a plain register/taskwait loop.
// ---------------------------------------------------------------------

fn run_taskiter(workers: usize) {
    const ITERATIONS: usize = 100;
    const LEN: usize = 50;

    let demo = Demo::new(workers);
    let mut a = [0i64; LEN];
    let base = a.as_mut_ptr() as usize;
    let span = LEN * std::mem::size_of::<i64>();
    let root = root_task(&demo);

    for _ in 0..ITERATIONS {
        for _ in 0..2 {
            let task = demo.system.create_task(Some(&root), TaskFlags::empty());
            let decl = AccessDecl::new(AccessKind::ReadWrite, base, span);
            let ready = demo.system.register(&task, Some(&root), vec![decl]).expect("register");
            demo.submit(
                &task,
                Box::new(move |_d, _t| {
                    let slice = unsafe { std::slice::from_raw_parts_mut(base as *mut i64, LEN) };
                    for x in slice.iter_mut() {
                        *x += 1;
                    }
                }),
                ready,
            );
        }
    }

    finish_root(&demo, &root);
    println!("taskiter-for equivalence: a[0] = {}, expected {}", a[0], 2 * ITERATIONS);
    Demo::shutdown(&demo);
}

// ---------------------------------------------------------------------
// Scenario 6: discrete chain with early release.
// ---------------------------------------------------------------------

fn run_discrete_chain(workers: usize) {
    let demo = Demo::new(workers);
    let mut v1 = 1i64;
    let mut v2 = 2i64;
    let addr1 = &mut v1 as *mut i64 as usize;
    let addr2 = &mut v2 as *mut i64 as usize;
    let root = root_task(&demo);

    let parent = demo.system.create_task(Some(&root), TaskFlags::empty());
    let decls = vec![AccessDecl::new(AccessKind::Read, addr1, 8), AccessDecl::new(AccessKind::Write, addr2, 8)];
    demo.system.register(&parent, Some(&root), decls).expect("register parent");
    demo.nodes.lock().unwrap().insert(parent.id, parent.clone());
    parent.mark_started();

    let child = demo.system.create_task(Some(&parent), TaskFlags::empty());
    let child_decl = AccessDecl::new(AccessKind::Write, addr2, 8);
    let child_ready = demo.system.register(&child, Some(&parent), vec![child_decl]).expect("register child");
    demo.submit(
        &child,
        Box::new(move |_d, _t| unsafe { *(addr2 as *mut i64) = 42 }),
        child_ready,
    );

    let sibling = demo.system.create_task(Some(&root), TaskFlags::empty());
    let sibling_decl = AccessDecl::new(AccessKind::Write, addr1, 8);
    let sibling_ready = demo.system.register(&sibling, Some(&root), vec![sibling_decl]).expect("register sibling");
    demo.submit(&sibling, Box::new(move |_d, _t| {}), sibling_ready);

    demo.system.release_access(&parent, addr1, AccessKind::Read, false).expect("release v1");
    parent.mark_finished();
    demo.system.finalize(&parent).expect("finalize parent");

    finish_root(&demo, &root);
    println!("discrete chain: v2 = {}", unsafe { *(addr2 as *const i64) });
    Demo::shutdown(&demo);
}
