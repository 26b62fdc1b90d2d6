// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Construction errors (`TaskIdDuplicate`, `DependencyDuplicate`,
//! `AncestorDescendantSame`, `CycleDetected`) are fatal to the DAG
//! definition. Execution errors (`TaskRetryable`, `ResponseInvalid`,
//! `CircuitBreak`, `Unknown`) short-circuit the current invocation and are
//! mapped to a structured [`InvocationError`] at the Lambda boundary.

use serde_json::json;
use thiserror::Error;

use crate::engine::context::DagRunContext;

/// Boxed error used to preserve arbitrary causes inside the taxonomy.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, DagError>;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("task id `{task_id}` already exists")]
    TaskIdDuplicate { task_id: String },

    #[error("dependency from `{ancestor}` to `{descendant}` already exists")]
    DependencyDuplicate {
        ancestor: String,
        descendant: String,
    },

    #[error("ancestor `{ancestor}` and descendant `{descendant}` are the same task")]
    AncestorDescendantSame {
        ancestor: String,
        descendant: String,
    },

    #[error("cycle detected in DAG: between `{start}` and `{end}`")]
    CycleDetected { start: String, end: String },

    #[error("task retryable: {source}")]
    TaskRetryable {
        #[source]
        source: BoxError,
    },

    #[error("task response is not serialisable: {source}")]
    ResponseInvalid {
        #[source]
        source: BoxError,
    },

    #[error("circuit break: invocation count over {limit}")]
    CircuitBreak { limit: u32 },

    #[error("unexpected: {source}")]
    Unknown {
        #[source]
        source: BoxError,
    },
}

impl DagError {
    /// Short kind name surfaced at the invocation boundary as part of the
    /// `errorType` field.
    pub fn kind(&self) -> &'static str {
        match self {
            DagError::TaskIdDuplicate { .. } => "TaskIDDuplicate",
            DagError::DependencyDuplicate { .. } => "TaskDependencyDuplicate",
            DagError::AncestorDescendantSame { .. } => "AncestorDescendantSame",
            DagError::CycleDetected { .. } => "CycleDetectedInDAG",
            DagError::TaskRetryable { .. } => "Retryable",
            DagError::ResponseInvalid { .. } => "ResponseInvalid",
            DagError::CircuitBreak { .. } => "CircuitBreak",
            DagError::Unknown { .. } => "Unknown",
        }
    }
}

/// Wrap an error so the executor treats the failure as retryable.
///
/// Typically used by lockers and handlers hitting transient contention:
/// the invocation fails (or, under parallelism, the continuation is returned
/// with `Continue = true`) and the caller is expected to re-invoke.
pub fn retryable(err: impl Into<BoxError>) -> DagError {
    DagError::TaskRetryable { source: err.into() }
}

/// Whether the error, or anything in its cause chain, is retryable.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DagError>(),
            Some(DagError::TaskRetryable { .. })
        )
    })
}

pub(crate) fn is_response_invalid(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DagError>(),
            Some(DagError::ResponseInvalid { .. })
        )
    })
}

/// Structured error record surfaced at the invocation boundary.
///
/// Serialises to the Lambda error shape `{"errorType", "errorMessage"}`. The
/// last continuation is attached when one exists so callers still observe the
/// partial run state (notably on `CircuitBreak`).
#[derive(Debug, Error)]
#[error("{error_type}: {error_message}")]
pub struct InvocationError {
    pub error_type: String,
    pub error_message: String,
    pub continuation: Option<DagRunContext>,
}

impl InvocationError {
    pub(crate) fn from_dag_error(err: DagError, continuation: Option<DagRunContext>) -> Self {
        Self {
            error_type: format!("RelayDAG.{}", err.kind()),
            error_message: err.to_string(),
            continuation,
        }
    }

    /// The wire shape written to the Invoke API response body and to the
    /// runtime API error endpoint.
    pub fn record(&self) -> serde_json::Value {
        json!({
            "errorType": self.error_type,
            "errorMessage": self.error_message,
        })
    }
}
