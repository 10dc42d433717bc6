//! Explicit task graph with dependencies derived from declared resource accesses.
//!
//! Every task lists the resources (tiles, communicator pipelines) it reads or writes. When
//! a task is added, its predecessors are computed from the access history of each resource:
//!
//! - a read depends on the last writer of the resource;
//! - a write depends on the last writer and on every reader since that write.
//!
//! Conflicting accesses to a resource therefore execute in submission order, while reads
//! between two writes may run concurrently. Extra edges can be added explicitly with
//! [`Task::after`], which is how the reduction to band inserts its trigger dependency.

use crate::error::DlaError;
use crate::matrix::tile::{Resource, ResourceId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Where a task runs: on the compute pool, or on the thread serving one communicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Compute,
    Comm(ResourceId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Description of a task: its name, scheduling hints and data accesses.
#[derive(Debug)]
pub struct Task {
    name: &'static str,
    priority: Priority,
    lane: Lane,
    accesses: Vec<(ResourceId, Access)>,
    after: Vec<TaskId>,
}

impl Task {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            priority: Priority::Normal,
            lane: Lane::Compute,
            accesses: Vec::new(),
            after: Vec::new(),
        }
    }

    /// A task running on the dedicated thread of `lane`, holding it exclusively.
    pub fn on_lane(name: &'static str, lane: ResourceId) -> Self {
        let mut task = Self::new(name);
        task.lane = Lane::Comm(lane);
        task.accesses.push((lane, Access::Write));
        task
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn reads(mut self, resource: &impl Resource) -> Self {
        self.accesses.push((resource.resource_id(), Access::Read));
        self
    }

    pub fn writes(mut self, resource: &impl Resource) -> Self {
        self.accesses.push((resource.resource_id(), Access::Write));
        self
    }

    pub fn reads_all<'a, R: Resource + 'a>(mut self, resources: impl IntoIterator<Item = &'a R>) -> Self {
        for r in resources {
            self.accesses.push((r.resource_id(), Access::Read));
        }
        self
    }

    pub fn writes_all<'a, R: Resource + 'a>(mut self, resources: impl IntoIterator<Item = &'a R>) -> Self {
        for r in resources {
            self.accesses.push((r.resource_id(), Access::Write));
        }
        self
    }

    /// Exclusive use of a resource without being scheduled on its lane.
    pub fn exclusive(mut self, resource: ResourceId) -> Self {
        self.accesses.push((resource, Access::Write));
        self
    }

    pub fn after(mut self, task: TaskId) -> Self {
        self.after.push(task);
        self
    }

    pub fn after_opt(self, task: Option<TaskId>) -> Self {
        match task {
            Some(task) => self.after(task),
            None => self,
        }
    }
}

pub(crate) type Job = Box<dyn FnOnce() -> Result<(), DlaError> + Send + 'static>;

pub(crate) struct Node {
    pub(crate) name: &'static str,
    pub(crate) priority: Priority,
    pub(crate) lane: Lane,
    pub(crate) predecessors: Vec<usize>,
    pub(crate) dependents: Vec<usize>,
    pub(crate) job: Job,
}

#[derive(Default)]
struct AccessHistory {
    last_writer: Option<usize>,
    readers: Vec<usize>,
}

#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<Node>,
    history: HashMap<ResourceId, AccessHistory>,
    abort_flags: Vec<Arc<AtomicBool>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Flags raised by the executor if the run fails, used to wake up peers blocked in
    /// communication.
    pub fn on_abort(&mut self, flag: Arc<AtomicBool>) {
        if !self.abort_flags.iter().any(|f| Arc::ptr_eq(f, &flag)) {
            self.abort_flags.push(flag);
        }
    }

    /// Adds a task and returns its id.
    pub fn spawn<F>(&mut self, task: Task, job: F) -> TaskId
    where
        F: FnOnce() -> Result<(), DlaError> + Send + 'static,
    {
        let id = self.nodes.len();
        let mut accesses = task.accesses;
        // A resource both read and written by a task counts as written.
        accesses.sort_by_key(|&(res, access)| (res, access == Access::Read));
        accesses.dedup_by_key(|(res, _)| *res);

        let mut predecessors: Vec<usize> = task.after.iter().map(|t| t.0).collect();
        for (res, access) in accesses {
            let history = self.history.entry(res).or_default();
            predecessors.extend(history.last_writer);
            match access {
                Access::Read => history.readers.push(id),
                Access::Write => {
                    predecessors.append(&mut history.readers);
                    history.last_writer = Some(id);
                }
            }
        }
        predecessors.sort_unstable();
        predecessors.dedup();

        for &p in &predecessors {
            assert!(p < id, "task dependency on a task not yet submitted");
            self.nodes[p].dependents.push(id);
        }
        log::trace!("task {id} `{}` after {predecessors:?}", task.name);
        self.nodes.push(Node {
            name: task.name,
            priority: task.priority,
            lane: task.lane,
            predecessors,
            dependents: Vec::new(),
            job: Box::new(job),
        });
        TaskId(id)
    }

    pub(crate) fn into_parts(self) -> (Vec<Node>, Vec<Arc<AtomicBool>>) {
        (self.nodes, self.abort_flags)
    }

    #[cfg(test)]
    pub(crate) fn predecessors(&self, task: TaskId) -> Vec<TaskId> {
        self.nodes[task.0]
            .predecessors
            .iter()
            .map(|&p| TaskId(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::WorkTile;

    fn noop() -> Result<(), DlaError> {
        Ok(())
    }

    #[test]
    fn test_read_write_dependencies() {
        let mut a = WorkTile::<f64>::zeros(1, 1);
        let b = WorkTile::<f64>::zeros(1, 1);
        let mut graph = TaskGraph::new();

        let w0 = graph.spawn(Task::new("w0").writes(&a.readwrite()), noop);
        let r1 = graph.spawn(Task::new("r1").reads(&a.read()), noop);
        let r2 = graph.spawn(Task::new("r2").reads(&a.read()).reads(&b.read()), noop);
        let w3 = graph.spawn(Task::new("w3").writes(&a.readwrite()), noop);
        let r4 = graph.spawn(Task::new("r4").reads(&a.read()), noop);

        assert!(graph.predecessors(w0).is_empty());
        assert_eq!(graph.predecessors(r1), vec![w0]);
        assert_eq!(graph.predecessors(r2), vec![w0]);
        assert_eq!(graph.predecessors(w3), vec![w0, r1, r2]);
        assert_eq!(graph.predecessors(r4), vec![w3]);
    }

    #[test]
    fn test_read_and_write_in_one_task_counts_as_write() {
        let mut a = WorkTile::<f32>::zeros(1, 1);
        let mut graph = TaskGraph::new();
        let r0 = graph.spawn(Task::new("r0").reads(&a.read()), noop);
        let rw = graph.spawn(
            Task::new("rw").reads(&a.read()).writes(&a.readwrite()),
            noop,
        );
        let r2 = graph.spawn(Task::new("r2").reads(&a.read()), noop);
        assert_eq!(graph.predecessors(rw), vec![r0]);
        assert_eq!(graph.predecessors(r2), vec![rw]);
    }

    #[test]
    fn test_explicit_edges() {
        let mut graph = TaskGraph::new();
        let t0 = graph.spawn(Task::new("t0"), noop);
        let t1 = graph.spawn(Task::new("t1").after_opt(Some(t0)), noop);
        let t2 = graph.spawn(Task::new("t2").after_opt(None), noop);
        assert_eq!(graph.predecessors(t1), vec![t0]);
        assert!(graph.predecessors(t2).is_empty());
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_lane_tasks_are_serialized() {
        let lane = ResourceId::fresh();
        let mut graph = TaskGraph::new();
        let c0 = graph.spawn(Task::on_lane("send", lane), noop);
        let c1 = graph.spawn(Task::on_lane("recv", lane), noop);
        assert_eq!(graph.predecessors(c1), vec![c0]);
    }
}
