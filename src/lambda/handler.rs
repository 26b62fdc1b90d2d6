// src/lambda/handler.rs

//! The invocation entry point.
//!
//! Decides whether an incoming payload is a resumed continuation or the
//! initial config of a fresh run, executes one slice, and maps executor
//! errors onto the invocation-boundary contract.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::dag::Dag;
use crate::engine::context::{Clock, DagRunContext};
use crate::errors::{DagError, InvocationError};

/// Invoke-API handler over a built DAG.
#[derive(Debug, Clone)]
pub struct LambdaHandler {
    dag: Arc<Dag>,
}

impl LambdaHandler {
    pub fn new(dag: Arc<Dag>) -> Self {
        Self { dag }
    }

    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    pub(crate) fn clock(&self) -> &Clock {
        self.dag.clock()
    }

    /// Handle one invocation.
    ///
    /// A payload that decodes to a continuation with a non-empty `DAGRunId`
    /// resumes that run; any other payload becomes the initial
    /// `DAGRunConfig` of a fresh run. Note this means a config object that
    /// happens to carry a `DAGRunId` field is indistinguishable from a
    /// continuation; callers must not choose a config schema that collides
    /// with the continuation schema.
    ///
    /// Error mapping:
    /// - retryable failure with parallelism > 1: siblings may have made
    ///   progress, so the partial continuation is returned with
    ///   `Continue = true` and the caller simply re-invokes;
    /// - retryable failure otherwise: a `RelayDAG.Retryable` error;
    /// - circuit break: a `RelayDAG.CircuitBreak` error carrying the
    ///   terminal continuation;
    /// - anything else: its kind name, continuation attached.
    pub async fn invoke(
        &self,
        cancel: CancellationToken,
        payload: Value,
    ) -> Result<Value, InvocationError> {
        let mut run = match serde_json::from_value::<DagRunContext>(payload.clone()) {
            Ok(run) if !run.dag_run_id.is_empty() => run,
            _ => DagRunContext::new_run(
                Uuid::new_v4().to_string(),
                self.clock().now(),
                payload,
            ),
        };

        match self.dag.execute(cancel, &mut run).await {
            Ok(()) => encode_continuation(run),
            Err(err @ DagError::TaskRetryable { .. }) => {
                if self.dag.tasks_per_invocation() > 1 {
                    warn!(
                        dag_run_id = %run.dag_run_id,
                        error = %err,
                        "retryable task failure; returning continuation for re-invoke"
                    );
                    run.continue_run = true;
                    encode_continuation(run)
                } else {
                    Err(InvocationError::from_dag_error(err, Some(run)))
                }
            }
            Err(err) => Err(InvocationError::from_dag_error(err, Some(run))),
        }
    }
}

fn encode_continuation(run: DagRunContext) -> Result<Value, InvocationError> {
    serde_json::to_value(&run).map_err(|err| {
        InvocationError::from_dag_error(
            DagError::Unknown {
                source: Box::new(err),
            },
            Some(run),
        )
    })
}
