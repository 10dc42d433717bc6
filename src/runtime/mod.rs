//! Task execution substrate.
//!
//! Algorithms describe their work as a [`TaskGraph`] and hand it to a [`Runtime`], which
//! runs it on a fixed pool of compute threads plus one dedicated thread per communicator
//! lane. Ready compute tasks are picked by priority, then by submission order; tasks of a
//! communicator lane run one at a time in submission order, which serializes the calls made
//! on each communicator.

pub mod barrier;
pub mod graph;
pub mod round_robin;

pub use barrier::SpinBarrier;
pub use graph::{Lane, Priority, Task, TaskGraph, TaskId};
pub use round_robin::RoundRobin;

use crate::error::{DlaError, DlaErrorKind};
use crate::matrix::ResourceId;
use crate::tune::TuneParameters;
use graph::{Job, Node};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-pool size and tuning parameters used by the algorithms.
#[derive(Clone, Debug)]
pub struct Runtime {
    compute_threads: usize,
    tune: TuneParameters,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Runtime {
    pub fn new(compute_threads: usize) -> Self {
        if compute_threads == 0 {
            log::warn!("Requested 0 compute threads; using 1.");
        }
        Self {
            compute_threads: compute_threads.max(1),
            tune: TuneParameters::default(),
        }
    }

    pub fn with_tune(mut self, tune: TuneParameters) -> Self {
        self.tune = tune;
        self
    }

    pub fn compute_threads(&self) -> usize {
        self.compute_threads
    }

    pub fn tune(&self) -> &TuneParameters {
        &self.tune
    }

    /// Runs all tasks of `graph` and waits for their completion.
    ///
    /// The first task error stops the run: no further task is started, the graph's abort
    /// flags are raised, and the error is returned once the running tasks have returned.
    pub fn execute(&self, graph: TaskGraph) -> Result<(), DlaError> {
        let (nodes, abort_flags) = graph.into_parts();
        if nodes.is_empty() {
            return Ok(());
        }
        let lanes: BTreeSet<ResourceId> = nodes
            .iter()
            .filter_map(|node| match node.lane {
                Lane::Comm(id) => Some(id),
                Lane::Compute => None,
            })
            .collect();
        log::debug!(
            "executing {} tasks on {} compute threads and {} communication lanes",
            nodes.len(),
            self.compute_threads,
            lanes.len()
        );

        let mut jobs = Vec::with_capacity(nodes.len());
        let mut meta = Vec::with_capacity(nodes.len());
        let mut state = RunState {
            ready_compute: BinaryHeap::new(),
            ready_comm: HashMap::new(),
            pending: Vec::with_capacity(nodes.len()),
            remaining: nodes.len(),
            failure: None,
        };
        for (id, node) in nodes.into_iter().enumerate() {
            let Node {
                name,
                priority,
                lane,
                predecessors,
                dependents,
                job,
            } = node;
            state.pending.push(predecessors.len());
            meta.push(TaskMeta {
                name,
                priority,
                lane,
                dependents,
            });
            jobs.push(Mutex::new(Some(job)));
            if predecessors.is_empty() {
                state.push_ready(id, lane, priority);
            }
        }

        let shared = Shared {
            meta,
            jobs,
            state: Mutex::new(state),
            cvar: Condvar::new(),
            abort_flags,
        };

        std::thread::scope(|scope| {
            let shared = &shared;
            let workers = (0..self.compute_threads)
                .map(|i| (format!("tiledla-worker-{i}"), Lane::Compute));
            let comms = lanes
                .iter()
                .map(|&lane| ("tiledla-comm".to_string(), Lane::Comm(lane)));
            for (name, lane) in workers.chain(comms) {
                let spawned = std::thread::Builder::new()
                    .name(name)
                    .spawn_scoped(scope, move || shared.work(lane));
                if let Err(e) = spawned {
                    shared.fail(DlaErrorKind::InputError(format!("cannot spawn thread: {e}")).into());
                    break;
                }
            }
        });

        let state = shared.state.into_inner();
        match state.failure {
            Some(err) => Err(err),
            None => {
                debug_assert_eq!(state.remaining, 0);
                Ok(())
            }
        }
    }
}

struct TaskMeta {
    name: &'static str,
    priority: Priority,
    lane: Lane,
    dependents: Vec<usize>,
}

struct RunState {
    ready_compute: BinaryHeap<(Priority, Reverse<usize>)>,
    ready_comm: HashMap<ResourceId, VecDeque<usize>>,
    pending: Vec<usize>,
    remaining: usize,
    failure: Option<DlaError>,
}

impl RunState {
    fn push_ready(&mut self, id: usize, lane: Lane, priority: Priority) {
        match lane {
            Lane::Compute => self.ready_compute.push((priority, Reverse(id))),
            Lane::Comm(lane) => self.ready_comm.entry(lane).or_default().push_back(id),
        }
    }

    fn pop_ready(&mut self, lane: Lane) -> Option<usize> {
        match lane {
            Lane::Compute => self.ready_compute.pop().map(|(_, Reverse(id))| id),
            Lane::Comm(lane) => self.ready_comm.get_mut(&lane).and_then(VecDeque::pop_front),
        }
    }
}

struct Shared {
    meta: Vec<TaskMeta>,
    jobs: Vec<Mutex<Option<Job>>>,
    state: Mutex<RunState>,
    cvar: Condvar,
    abort_flags: Vec<Arc<AtomicBool>>,
}

impl Shared {
    fn work(&self, lane: Lane) {
        loop {
            let id = {
                let mut state = self.state.lock();
                loop {
                    if state.failure.is_some() || state.remaining == 0 {
                        return;
                    }
                    if let Some(id) = state.pop_ready(lane) {
                        break id;
                    }
                    self.cvar.wait(&mut state);
                }
            };

            let name = self.meta[id].name;
            let job = self.jobs[id].lock().take();
            let result = match job {
                Some(job) => {
                    log::trace!("task {id} `{name}` started");
                    catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic payload".to_string());
                        Err(DlaErrorKind::TaskPanicked {
                            task: name.to_string(),
                            message,
                        }
                        .into())
                    })
                }
                None => Ok(()),
            };

            let mut state = self.state.lock();
            match result {
                Ok(()) => {
                    state.remaining -= 1;
                    for &dep in &self.meta[id].dependents {
                        state.pending[dep] -= 1;
                        if state.pending[dep] == 0 {
                            let meta = &self.meta[dep];
                            state.push_ready(dep, meta.lane, meta.priority);
                        }
                    }
                }
                Err(err) => {
                    if state.failure.is_none() && !err.is_abort() {
                        log::error!("task `{name}` failed: {err}");
                    }
                    Self::record_failure(&mut state, err, &self.abort_flags);
                }
            }
            self.cvar.notify_all();
        }
    }

    fn record_failure(state: &mut RunState, err: DlaError, abort_flags: &[Arc<AtomicBool>]) {
        if state.failure.is_none() {
            state.failure = Some(err);
            for flag in abort_flags {
                flag.store(true, Ordering::Release);
            }
        }
    }

    fn fail(&self, err: DlaError) {
        let mut state = self.state.lock();
        Self::record_failure(&mut state, err, &self.abort_flags);
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::WorkTile;

    #[test]
    fn test_writes_run_in_submission_order() {
        let mut tile = WorkTile::<f64>::zeros(1, 1);
        let mut graph = TaskGraph::new();
        for k in 0..20 {
            let t = tile.readwrite();
            graph.spawn(Task::new("step").writes(&t), move || {
                let mut guard = t.lock();
                let old = guard.view()[(0, 0)];
                guard.view_mut()[(0, 0)] = old * 2.0 + k as f64;
                Ok(())
            });
        }
        Runtime::new(4).execute(graph).unwrap();
        let expected = (0..20).fold(0.0, |acc, k| acc * 2.0 + k as f64);
        assert_eq!(tile.read().to_mat()[(0, 0)], expected);
    }

    #[test]
    fn test_high_priority_first_on_single_thread() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        for (name, priority) in [("a", Priority::Normal), ("b", Priority::High), ("c", Priority::Normal)] {
            let order = Arc::clone(&order);
            graph.spawn(Task::new(name).priority(priority), move || {
                order.lock().push(name);
                Ok(())
            });
        }
        Runtime::new(1).execute(graph).unwrap();
        assert_eq!(*order.lock(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_first_error_aborts_run() {
        let flag = Arc::new(AtomicBool::new(false));
        let ran_after = Arc::new(AtomicBool::new(false));
        let mut tile = WorkTile::<f32>::zeros(1, 1);
        let mut graph = TaskGraph::new();
        graph.on_abort(Arc::clone(&flag));
        let t = tile.readwrite();
        graph.spawn(Task::new("fails").writes(&t), || {
            Err(DlaErrorKind::Communication("peer gone".to_string()).into())
        });
        let t = tile.readwrite();
        let ran = Arc::clone(&ran_after);
        graph.spawn(Task::new("after").writes(&t), move || {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        });
        let err = Runtime::new(2).execute(graph).unwrap_err();
        assert_eq!(err.to_string(), "Communication failure: peer gone");
        assert!(flag.load(Ordering::SeqCst));
        assert!(!ran_after.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_becomes_error() {
        let mut graph = TaskGraph::new();
        graph.spawn(Task::new("explodes"), || panic!("kaboom"));
        let err = Runtime::new(1).execute(graph).unwrap_err();
        assert_eq!(err.to_string(), "Task `explodes` panicked: kaboom");
    }

    #[test]
    fn test_lane_tasks_run_in_order() {
        let lane = ResourceId::fresh();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        for k in 0..10 {
            let order = Arc::clone(&order);
            graph.spawn(Task::on_lane("comm", lane), move || {
                order.lock().push(k);
                Ok(())
            });
        }
        Runtime::new(2).execute(graph).unwrap();
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }
}
