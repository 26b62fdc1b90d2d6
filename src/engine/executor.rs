// src/engine/executor.rs

//! The per-invocation execution slice.
//!
//! One call to [`Dag::execute`] advances a run by a single invocation: it
//! computes the ready set from the continuation, runs a bounded, id-ordered
//! prefix of it in parallel, commits the responses, and rewrites the
//! continuation's `Continue` flag. All cross-invocation state lives in the
//! continuation; the DAG itself is read-only here.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::dag::Dag;
use crate::engine::context::DagRunContext;
use crate::errors::{is_response_invalid, is_retryable, DagError};

impl Dag {
    /// Execute one invocation slice against `run`.
    ///
    /// Mutates `run` in place so partial progress survives an error return:
    /// responses committed before a sibling failed stay in `TaskResponses`,
    /// and a retry invocation will not re-run those tasks.
    ///
    /// `cancel` is the host's cancellation signal; a child of it is handed
    /// to every handler and additionally cancelled when any sibling fails.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        run: &mut DagRunContext,
    ) -> Result<(), DagError> {
        let span = self.run_span(run);
        self.execute_slice(cancel, run).instrument(span).await
    }

    async fn execute_slice(
        &self,
        cancel: CancellationToken,
        run: &mut DagRunContext,
    ) -> Result<(), DagError> {
        if run.lambda_call_count == 0 {
            info!(
                dag = %self.id(),
                dag_run_id = %run.dag_run_id,
                "start new DAG"
            );
        }

        run.lambda_call_count += 1;
        let breaker = self.circuit_breaker();
        if run.lambda_call_count >= breaker {
            info!(
                dag_run_id = %run.dag_run_id,
                call_count = run.lambda_call_count,
                "DAG run circuit break"
            );
            run.continue_run = false;
            run.is_circuit_break = true;
            return Err(DagError::CircuitBreak { limit: breaker });
        }

        let finished = run.finished_task_ids();
        let finished_refs: Vec<&str> = finished.iter().map(String::as_str).collect();
        let ready = self.executable_tasks(&finished_refs);
        run.continue_run = true;
        if ready.is_empty() {
            self.finish_run(run);
            return Ok(());
        }

        // Launch an id-ordered prefix of the ready set; the subset is
        // deterministic for a fixed finished set and cap.
        let slice = &ready[..ready.len().min(self.tasks_per_invocation())];
        let child = cancel.child_token();
        let committed: Arc<Mutex<BTreeMap<String, Value>>> = Arc::default();
        let snapshot = Arc::new(run.clone());

        let mut join_set = JoinSet::new();
        for task in slice {
            let task = Arc::clone(task);
            let child = child.clone();
            let committed = Arc::clone(&committed);
            let snapshot = Arc::clone(&snapshot);
            let span = self.task_span(&task, run);

            join_set.spawn(
                async move {
                    info!(
                        dag_run_id = %snapshot.dag_run_id,
                        task_id = %task.id(),
                        "start task"
                    );
                    let result = task.execute(child, &snapshot).await;
                    info!(
                        dag_run_id = %snapshot.dag_run_id,
                        task_id = %task.id(),
                        success = result.is_ok(),
                        "end task"
                    );
                    match result {
                        Ok(value) => {
                            committed
                                .lock()
                                .await
                                .insert(task.id().to_string(), value);
                            Ok(())
                        }
                        Err(err) => Err((task.id().to_string(), err)),
                    }
                }
                .instrument(span),
            );
        }

        // Cancel siblings on the first failure, but always drain the whole
        // set: handlers that ignore cancellation are still awaited.
        let mut first_err: Option<DagError> = None;
        while let Some(joined) = join_set.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err((task_id, err))) => Some(classify_task_error(&task_id, err)),
                Err(join_err) => Some(DagError::Unknown {
                    source: Box::new(join_err),
                }),
            };
            if let Some(err) = failure {
                if first_err.is_none() {
                    child.cancel();
                    first_err = Some(err);
                }
            }
        }

        let mut committed = committed.lock().await;
        run.task_responses.append(&mut committed);
        drop(committed);

        if let Some(err) = first_err {
            return Err(err);
        }

        let finished = run.finished_task_ids();
        let finished_refs: Vec<&str> = finished.iter().map(String::as_str).collect();
        if self.executable_tasks(&finished_refs).is_empty() {
            self.finish_run(run);
        }
        Ok(())
    }

    fn finish_run(&self, run: &mut DagRunContext) {
        let duration = self.clock().now() - run.dag_run_start_at;
        info!(
            dag_run_id = %run.dag_run_id,
            duration = %duration,
            "end DAG"
        );
        run.continue_run = false;
    }
}

fn classify_task_error(task_id: &str, err: anyhow::Error) -> DagError {
    if is_retryable(&err) {
        return DagError::TaskRetryable { source: err.into() };
    }
    if is_response_invalid(&err) {
        return DagError::ResponseInvalid {
            source: err.context(format!("task `{task_id}`")).into(),
        };
    }
    match err.downcast::<DagError>() {
        Ok(dag_err) => dag_err,
        Err(err) => DagError::Unknown {
            source: err.context(format!("task `{task_id}`")).into(),
        },
    }
}
