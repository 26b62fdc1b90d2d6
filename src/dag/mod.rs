// src/dag/mod.rs

//! DAG construction and topological queries.
//!
//! - [`graph`] holds the petgraph-backed dependency graph with
//!   insertion-time cycle detection.
//! - [`task`] defines tasks, handlers and per-task options.
//!
//! The per-invocation executor (`Dag::execute`) lives in
//! [`crate::engine::executor`].

pub mod graph;
pub mod task;

use std::sync::Arc;

use anyhow::Result;

use crate::engine::context::{Clock, DagRunContext};
use crate::errors::DagError;
use graph::DependencyGraph;
use task::{Task, TaskHandler, TaskOptions, TaskRef};

const DEFAULT_CIRCUIT_BREAKER: u32 = 10_000;

type SpanFactory = Arc<dyn Fn(&DagRunContext) -> tracing::Span + Send + Sync>;

/// DAG-level options. All optional; see the individual builder methods for
/// defaults.
#[derive(Clone, Default)]
pub struct DagOptions {
    span: Option<SpanFactory>,
    tasks_per_invocation: usize,
    circuit_breaker: u32,
    clock: Clock,
}

impl DagOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Span under which the executor and task handlers run.
    pub fn with_span(
        mut self,
        f: impl Fn(&DagRunContext) -> tracing::Span + Send + Sync + 'static,
    ) -> Self {
        self.span = Some(Arc::new(f));
        self
    }

    /// Per-invocation parallelism cap. Values below 1 fall back to 1.
    pub fn with_tasks_per_invocation(mut self, num: usize) -> Self {
        self.tasks_per_invocation = num;
        self
    }

    /// Maximum number of invocations a single run may consume before it is
    /// aborted. Values below 1 fall back to the default of 10 000.
    pub fn with_circuit_breaker(mut self, num: u32) -> Self {
        self.circuit_breaker = num;
        self
    }

    /// Time source for run timestamps. Tests inject a frozen clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// A directed acyclic graph of tasks.
///
/// The graph is mutated only during construction; `execute` treats it as
/// read-only, so a built DAG can be shared behind an `Arc`.
pub struct Dag {
    id: String,
    opts: DagOptions,
    graph: DependencyGraph,
    tasks: std::collections::BTreeMap<String, Arc<Task>>,
}

impl Dag {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(id, DagOptions::default())
    }

    pub fn with_options(id: impl Into<String>, opts: DagOptions) -> Self {
        Self {
            id: id.into(),
            opts,
            graph: DependencyGraph::default(),
            tasks: std::collections::BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tasks_per_invocation(&self) -> usize {
        self.opts.tasks_per_invocation.max(1)
    }

    pub fn circuit_breaker(&self) -> u32 {
        if self.opts.circuit_breaker == 0 {
            DEFAULT_CIRCUIT_BREAKER
        } else {
            self.opts.circuit_breaker
        }
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.opts.clock
    }

    pub(crate) fn run_span(&self, run: &DagRunContext) -> tracing::Span {
        match &self.opts.span {
            Some(f) => f(run),
            None => tracing::info_span!(
                "dag_run",
                dag = %self.id,
                dag_run_id = %run.dag_run_id,
            ),
        }
    }

    pub(crate) fn task_span(&self, task: &Task, run: &DagRunContext) -> tracing::Span {
        task.span(run).unwrap_or_else(|| {
            tracing::info_span!(
                "task",
                dag_run_id = %run.dag_run_id,
                task_id = %task.id(),
            )
        })
    }

    /// Add a task. Fails with `TaskIdDuplicate` if the id is taken.
    pub fn new_task(
        &mut self,
        id: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<TaskRef, DagError> {
        self.new_task_with_options(id, handler, TaskOptions::default())
    }

    pub fn new_task_with_options(
        &mut self,
        id: impl Into<String>,
        handler: impl TaskHandler + 'static,
        opts: TaskOptions,
    ) -> Result<TaskRef, DagError> {
        let id = id.into();
        self.graph.add_vertex(&id)?;
        let task = Arc::new(Task::new(id.clone(), Arc::new(handler), opts));
        self.tasks.insert(id.clone(), task);
        Ok(TaskRef { id: id.into() })
    }

    /// Add the edge `ancestor -> descendant`: the descendant may start only
    /// after the ancestor has completed successfully.
    pub fn add_dependency(
        &mut self,
        ancestor: &TaskRef,
        descendant: &TaskRef,
    ) -> Result<(), DagError> {
        self.graph.add_edge(ancestor.id(), descendant.id())
    }

    /// Make every task in `descendants` depend on `task`.
    pub fn set_downstream(
        &mut self,
        task: &TaskRef,
        descendants: &[&TaskRef],
    ) -> Result<(), DagError> {
        for descendant in descendants {
            self.add_dependency(task, descendant)?;
        }
        Ok(())
    }

    /// Make `task` depend on every task in `ancestors`.
    pub fn set_upstream(
        &mut self,
        task: &TaskRef,
        ancestors: &[&TaskRef],
    ) -> Result<(), DagError> {
        for ancestor in ancestors {
            self.add_dependency(ancestor, task)?;
        }
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks.get(id).cloned()
    }

    /// All tasks, sorted by id.
    pub fn all_tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.values().cloned().collect()
    }

    /// Tasks with no upstream dependency, sorted by id.
    pub fn start_tasks(&self) -> Vec<Arc<Task>> {
        self.tasks_by_ids(self.graph.roots())
    }

    /// Direct children of `id`, sorted. Unknown ids yield an empty list.
    pub fn downstream_tasks(&self, id: &str) -> Vec<Arc<Task>> {
        self.tasks_by_ids(self.graph.children(id))
    }

    /// Direct parents of `id`, sorted. Unknown ids yield an empty list.
    pub fn upstream_tasks(&self, id: &str) -> Vec<Arc<Task>> {
        self.tasks_by_ids(self.graph.parents(id))
    }

    /// Transitive ancestors of `id`, in topological order.
    pub fn ancestor_tasks(&self, id: &str) -> Vec<Arc<Task>> {
        self.tasks_by_ids(self.graph.ancestors(id))
    }

    /// Transitive descendants of `id`, in topological order.
    pub fn descendant_tasks(&self, id: &str) -> Vec<Arc<Task>> {
        self.tasks_by_ids(self.graph.descendants(id))
    }

    fn tasks_by_ids(&self, ids: Vec<String>) -> Vec<Arc<Task>> {
        ids.iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// Whether every direct upstream of `id` is in `finished`.
    pub fn is_executable(&self, id: &str, finished: &[&str]) -> bool {
        self.graph
            .parents(id)
            .iter()
            .all(|parent| finished.contains(&parent.as_str()))
    }

    /// Unfinished tasks whose upstreams are all finished, sorted by id.
    /// A finished task is never returned.
    pub fn executable_tasks(&self, finished: &[&str]) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|(id, _)| {
                !finished.contains(&id.as_str()) && self.is_executable(id, finished)
            })
            .map(|(_, task)| task.clone())
            .collect()
    }

    /// Visit every edge exactly once, iterating ancestor/descendant pairs in
    /// id order. Stops at the first error the callback returns.
    pub fn walk_dependencies(
        &self,
        mut f: impl FnMut(&Task, &Task) -> Result<()>,
    ) -> Result<()> {
        let ids = self.graph.ids();
        for ancestor_id in &ids {
            for descendant_id in &ids {
                if ancestor_id == descendant_id {
                    continue;
                }
                if self.graph.is_edge(ancestor_id, descendant_id) {
                    let ancestor = &self.tasks[ancestor_id];
                    let descendant = &self.tasks[descendant_id];
                    f(ancestor, descendant)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("id", &self.id)
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use super::task::handler_fn;

    fn noop_dag(ids: &[&str]) -> (Dag, Vec<TaskRef>) {
        let mut dag = Dag::new("test");
        let refs = ids
            .iter()
            .map(|id| {
                dag.new_task(*id, handler_fn(|_, _| async { Ok(json!(null)) }))
                    .unwrap()
            })
            .collect();
        (dag, refs)
    }

    #[test]
    fn duplicate_task_id_leaves_one_vertex() {
        let mut dag = Dag::new("test");
        dag.new_task("x", handler_fn(|_, _| async { Ok(json!(null)) }))
            .unwrap();
        let err = dag
            .new_task("x", handler_fn(|_, _| async { Ok(json!(null)) }))
            .unwrap_err();
        assert!(matches!(err, DagError::TaskIdDuplicate { task_id } if task_id == "x"));
        assert_eq!(dag.all_tasks().len(), 1);
    }

    #[test]
    fn start_tasks_equal_executable_of_empty() {
        let (mut dag, t) = noop_dag(&["t1", "t2", "t3"]);
        dag.add_dependency(&t[0], &t[1]).unwrap();
        dag.add_dependency(&t[1], &t[2]).unwrap();

        let starts: Vec<_> = dag.start_tasks().iter().map(|t| t.id().to_string()).collect();
        let executable: Vec<_> = dag
            .executable_tasks(&[])
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(starts, executable);
        assert_eq!(starts, vec!["t1"]);
    }

    #[test]
    fn finished_tasks_are_never_executable() {
        let (mut dag, t) = noop_dag(&["t1", "t2"]);
        dag.add_dependency(&t[0], &t[1]).unwrap();

        let executable: Vec<_> = dag
            .executable_tasks(&["t1"])
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(executable, vec!["t2"]);

        assert!(dag.executable_tasks(&["t1", "t2"]).is_empty());
    }

    #[test]
    fn defaults_apply_when_options_are_zero() {
        let dag = Dag::with_options(
            "test",
            DagOptions::new()
                .with_tasks_per_invocation(0)
                .with_circuit_breaker(0),
        );
        assert_eq!(dag.tasks_per_invocation(), 1);
        assert_eq!(dag.circuit_breaker(), 10_000);
    }

    #[test]
    fn walk_visits_each_edge_once_in_id_order() {
        let (mut dag, t) = noop_dag(&["t1", "t2", "t3"]);
        dag.add_dependency(&t[0], &t[1]).unwrap();
        dag.add_dependency(&t[0], &t[2]).unwrap();
        dag.add_dependency(&t[1], &t[2]).unwrap();

        let mut edges = Vec::new();
        dag.walk_dependencies(|a, d| {
            edges.push((a.id().to_string(), d.id().to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            edges,
            vec![
                ("t1".to_string(), "t2".to_string()),
                ("t1".to_string(), "t3".to_string()),
                ("t2".to_string(), "t3".to_string()),
            ]
        );
    }

    #[test]
    fn walk_stops_on_first_error() {
        let (mut dag, t) = noop_dag(&["t1", "t2", "t3"]);
        dag.add_dependency(&t[0], &t[1]).unwrap();
        dag.add_dependency(&t[0], &t[2]).unwrap();

        let mut visited = 0;
        let err = dag.walk_dependencies(|_, _| {
            visited += 1;
            anyhow::bail!("stop")
        });
        assert!(err.is_err());
        assert_eq!(visited, 1);
    }
}
