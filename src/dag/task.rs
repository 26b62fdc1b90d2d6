// src/dag/task.rs

//! Tasks: one named unit of work with an async handler and per-task options.
//!
//! Tasks are created only through [`Dag::new_task`](crate::dag::Dag::new_task)
//! and are owned by their DAG. Handlers receive a read-only [`TaskRequest`]
//! and return any serialisable value; the adapter encodes it to JSON before
//! the executor commits it to the continuation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::context::DagRunContext;
use crate::errors::DagError;
use crate::locker::{NopLocker, TaskLocker};

/// What a task handler receives. Read-only: mutating the run state is the
/// executor's job.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Uuid of the whole DAG run.
    pub dag_run_id: String,
    /// The run's initial config payload, verbatim.
    pub dag_run_config: Value,
    /// Responses of every finished task, so a handler can read any
    /// ancestor's output by id.
    pub task_responses: Arc<BTreeMap<String, Value>>,
}

impl TaskRequest {
    pub(crate) fn from_run(run: &DagRunContext) -> Self {
        Self {
            dag_run_id: run.dag_run_id.clone(),
            dag_run_config: run.dag_run_config.clone(),
            task_responses: Arc::new(run.task_responses.clone()),
        }
    }
}

/// A task's unit of work.
///
/// The cancellation token is cancelled as soon as a sibling task in the same
/// invocation fails; handlers doing long work should observe it and return
/// promptly. Handlers that ignore it are still awaited.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn invoke(&self, cancel: CancellationToken, req: TaskRequest) -> Result<Value>;
}

/// Adapt an async closure into a [`TaskHandler`].
///
/// The closure may return any `Serialize` value; it is encoded to JSON here,
/// and an encoding failure surfaces as `ResponseInvalid`.
pub fn handler_fn<F, Fut, T>(f: F) -> HandlerFn<F>
where
    F: Fn(CancellationToken, TaskRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    HandlerFn { f }
}

pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, T> TaskHandler for HandlerFn<F>
where
    F: Fn(CancellationToken, TaskRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    async fn invoke(&self, cancel: CancellationToken, req: TaskRequest) -> Result<Value> {
        let value = (self.f)(cancel, req).await?;
        serde_json::to_value(value).map_err(|err| {
            anyhow::Error::new(DagError::ResponseInvalid {
                source: Box::new(err),
            })
        })
    }
}

type SpanFactory = Arc<dyn Fn(&DagRunContext) -> tracing::Span + Send + Sync>;
type LockerFactory =
    Arc<dyn Fn(&DagRunContext) -> Result<Arc<dyn TaskLocker>> + Send + Sync>;

/// Per-task options. All optional.
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub(crate) span: Option<SpanFactory>,
    pub(crate) locker: Option<LockerFactory>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Span under which this task's handler runs, replacing the DAG-level
    /// default.
    pub fn with_span(
        mut self,
        f: impl Fn(&DagRunContext) -> tracing::Span + Send + Sync + 'static,
    ) -> Self {
        self.span = Some(Arc::new(f));
        self
    }

    /// Locker built per run; acquired before the handler and released on
    /// every exit path.
    pub fn with_locker(
        mut self,
        f: impl Fn(&DagRunContext) -> Result<Arc<dyn TaskLocker>> + Send + Sync + 'static,
    ) -> Self {
        self.locker = Some(Arc::new(f));
        self
    }
}

/// One vertex of the DAG.
pub struct Task {
    id: String,
    handler: Arc<dyn TaskHandler>,
    opts: TaskOptions,
}

impl Task {
    pub(crate) fn new(id: String, handler: Arc<dyn TaskHandler>, opts: TaskOptions) -> Self {
        Self { id, handler, opts }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn span(&self, run: &DagRunContext) -> Option<tracing::Span> {
        self.opts.span.as_ref().map(|f| f(run))
    }

    fn locker(&self, run: &DagRunContext) -> Result<Arc<dyn TaskLocker>> {
        match &self.opts.locker {
            Some(f) => f(run),
            None => Ok(Arc::new(NopLocker)),
        }
    }

    /// Run the handler wrapped in the task's lock.
    ///
    /// A lock that is not granted translates into a retryable failure so the
    /// caller re-invokes later; the lock is released on every exit path.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        run: &DagRunContext,
    ) -> Result<Value> {
        let locker = self.locker(run)?;
        let granted = locker.try_lock().await?;
        if !granted {
            warn!(
                dag_run_id = %run.dag_run_id,
                task_id = %self.id,
                "can not get lock"
            );
            return Err(anyhow::Error::new(crate::errors::retryable(
                "can not get lock",
            )));
        }

        let result = self
            .handler
            .invoke(cancel, TaskRequest::from_run(run))
            .await;
        let unlocked = locker.unlock().await;

        let value = result?;
        unlocked?;
        Ok(value)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

/// Cheap handle to a task, returned by `Dag::new_task` and accepted by the
/// dependency methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub(crate) id: Arc<str>,
}

impl TaskRef {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::SemaphoreLocker;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn run_for_test() -> DagRunContext {
        DagRunContext::new_run(
            "run-1",
            "2022-06-19T09:00:00Z".parse().unwrap(),
            json!({"k": 1}),
        )
    }

    fn task_with(opts: TaskOptions) -> Task {
        Task::new(
            "t1".to_string(),
            Arc::new(handler_fn(|_, req: TaskRequest| async move {
                Ok(json!({"config": req.dag_run_config}))
            })),
            opts,
        )
    }

    #[tokio::test]
    async fn handler_output_is_json_encoded() {
        let task = task_with(TaskOptions::new());
        let value = task
            .execute(CancellationToken::new(), &run_for_test())
            .await
            .unwrap();
        assert_eq!(value, json!({"config": {"k": 1}}));
    }

    #[tokio::test]
    async fn non_serialisable_response_is_response_invalid() {
        // Tuple-keyed maps cannot be encoded as JSON objects.
        let task = Task::new(
            "t1".to_string(),
            Arc::new(handler_fn(|_, _| async {
                let mut bad = std::collections::HashMap::new();
                bad.insert((1u8, 2u8), "x");
                Ok(bad)
            })),
            TaskOptions::new(),
        );
        let err = task
            .execute(CancellationToken::new(), &run_for_test())
            .await
            .unwrap_err();
        assert!(crate::errors::is_response_invalid(&err));
    }

    #[tokio::test]
    async fn held_lock_turns_into_retryable() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.clone().try_acquire_owned().unwrap().forget();

        let lock_sem = semaphore.clone();
        let task = task_with(TaskOptions::new().with_locker(move |_| {
            Ok(Arc::new(SemaphoreLocker::new(lock_sem.clone())) as Arc<dyn TaskLocker>)
        }));

        let err = task
            .execute(CancellationToken::new(), &run_for_test())
            .await
            .unwrap_err();
        assert!(crate::errors::is_retryable(&err));
    }

    #[tokio::test]
    async fn lock_is_released_after_success() {
        let semaphore = Arc::new(Semaphore::new(1));
        let lock_sem = semaphore.clone();
        let task = task_with(TaskOptions::new().with_locker(move |_| {
            Ok(Arc::new(SemaphoreLocker::new(lock_sem.clone())) as Arc<dyn TaskLocker>)
        }));

        task.execute(CancellationToken::new(), &run_for_test())
            .await
            .unwrap();
        assert_eq!(semaphore.available_permits(), 1);
    }
}
