#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use relaydag::{handler_fn, Clock, Dag, DagOptions, TaskHandler, TaskRef};

/// The instant used by frozen-clock tests.
pub const FROZEN_INSTANT: &str = "2022-06-19T09:00:00Z";

/// A clock frozen at [`FROZEN_INSTANT`].
pub fn frozen_clock() -> Clock {
    let at: DateTime<Utc> = FROZEN_INSTANT.parse().expect("frozen instant parses");
    Clock::fixed(at)
}

/// Shared record of which tasks ran, in completion order.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    handled: Arc<Mutex<Vec<String>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task_id: &str) {
        self.handled.lock().unwrap().push(task_id.to_string());
    }

    /// Handled task ids in completion order.
    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }

    /// Handled task ids, sorted, for order-insensitive assertions.
    pub fn handled_sorted(&self) -> Vec<String> {
        let mut ids = self.handled();
        ids.sort();
        ids
    }
}

/// Handler that records the task id and returns `"<id> success"`.
pub fn recording_handler(task_id: &str, log: InvocationLog) -> impl TaskHandler {
    let task_id = task_id.to_string();
    handler_fn(move |_, _| {
        let task_id = task_id.clone();
        let log = log.clone();
        async move {
            log.record(&task_id);
            Ok(format!("{task_id} success"))
        }
    })
}

/// Builder for DAGs of recording tasks to simplify test setup.
pub struct DagBuilder {
    dag: Dag,
    refs: HashMap<String, TaskRef>,
    log: InvocationLog,
}

impl DagBuilder {
    pub fn new(id: &str, opts: DagOptions) -> Self {
        Self {
            dag: Dag::with_options(id, opts),
            refs: HashMap::new(),
            log: InvocationLog::new(),
        }
    }

    /// Add a recording task named `id`.
    pub fn task(mut self, id: &str) -> Self {
        let task_ref = self
            .dag
            .new_task(id, recording_handler(id, self.log.clone()))
            .expect("unique task id in builder");
        self.refs.insert(id.to_string(), task_ref);
        self
    }

    /// Add a task with an explicit handler.
    pub fn task_with(mut self, id: &str, handler: impl TaskHandler + 'static) -> Self {
        let task_ref = self
            .dag
            .new_task(id, handler)
            .expect("unique task id in builder");
        self.refs.insert(id.to_string(), task_ref);
        self
    }

    /// Add the edge `ancestor -> descendant`. Both tasks must already exist.
    pub fn edge(mut self, ancestor: &str, descendant: &str) -> Self {
        let a = self.refs[ancestor].clone();
        let d = self.refs[descendant].clone();
        self.dag
            .add_dependency(&a, &d)
            .expect("valid edge in builder");
        self
    }

    pub fn build(self) -> (Dag, InvocationLog) {
        (self.dag, self.log)
    }
}
