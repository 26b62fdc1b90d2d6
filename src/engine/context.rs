// src/engine/context.rs

//! The continuation token.
//!
//! A [`DagRunContext`] is the *only* state shared between invocations of a
//! DAG run. It travels inside the invocation response payload: the caller
//! feeds each response back as the next request until `Continue` is false.
//! The JSON field names are part of the wire contract and must not change.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full state of one DAG run, round-tripped through JSON between
/// invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRunContext {
    /// Stable uuid for the whole run.
    #[serde(rename = "DAGRunId", default)]
    pub dag_run_id: String,

    /// Timestamp of the first invocation (RFC 3339 on the wire).
    #[serde(rename = "DAGRunStartAt", default = "epoch")]
    pub dag_run_start_at: DateTime<Utc>,

    /// The initial payload, preserved verbatim. Handlers read it to
    /// parameterise the run; the executor never interprets it.
    #[serde(rename = "DAGRunConfig", default)]
    pub dag_run_config: Value,

    /// Serialised response of every finished task, keyed by task id.
    #[serde(
        rename = "TaskResponses",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub task_responses: BTreeMap<String, Value>,

    /// Number of invocations that have seen this run.
    #[serde(rename = "LambdaCallCount", default)]
    pub lambda_call_count: u32,

    /// Whether the caller should re-invoke with this continuation.
    #[serde(rename = "Continue", default)]
    pub continue_run: bool,

    /// Set when the run was aborted by the circuit breaker.
    #[serde(
        rename = "IsCircuitBreak",
        default,
        skip_serializing_if = "is_false"
    )]
    pub is_circuit_break: bool,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl DagRunContext {
    /// Mint the continuation for a brand-new run. The incoming payload
    /// becomes the run config; everything else starts empty.
    pub fn new_run(
        dag_run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        config: Value,
    ) -> Self {
        Self {
            dag_run_id: dag_run_id.into(),
            dag_run_start_at: started_at,
            dag_run_config: config,
            task_responses: BTreeMap::new(),
            lambda_call_count: 0,
            continue_run: false,
            is_circuit_break: false,
        }
    }

    /// Ids of the tasks that have a committed response, in id order.
    pub fn finished_task_ids(&self) -> Vec<String> {
        self.task_responses.keys().cloned().collect()
    }
}

/// Time source for run start timestamps and duration reporting.
///
/// The system clock is the default; tests inject a fixed instant so
/// continuations and log output are deterministic.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Self(Arc::new(Utc::now))
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self(Arc::new(move || at))
    }

    pub fn from_fn(f: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}
