// src/lib.rs

//! relaydag: drive a DAG of tasks to completion across stateless Lambda
//! invocations.
//!
//! Build a [`Dag`], wire its dependencies, then hand it to [`run`]. On a
//! hosted Lambda runtime the process registers as the function handler; the
//! function re-invokes itself via its caller until the run's continuation
//! reports `Continue = false`. Anywhere else the same binary becomes a small
//! CLI with a local Invoke-API stub (`serve`) and a graph renderer
//! (`render`).
//!
//! ```no_run
//! use relaydag::{handler_fn, Dag};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut dag = Dag::new("SampleDAG");
//!     let task1 = dag.new_task("task1", handler_fn(|_, _| async { Ok("task1 success") }))?;
//!     let task2 = dag.new_task("task2", handler_fn(|_, _| async { Ok("task2 success") }))?;
//!     dag.add_dependency(&task1, &task2)?;
//!     relaydag::run(dag).await
//! }
//! ```

pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod lambda;
pub mod locker;
pub mod logging;
pub mod render;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

pub use crate::dag::task::{handler_fn, Task, TaskHandler, TaskOptions, TaskRef, TaskRequest};
pub use crate::dag::{Dag, DagOptions};
pub use crate::engine::{Clock, DagRunContext};
pub use crate::errors::{is_retryable, retryable, DagError, InvocationError};
pub use crate::lambda::LambdaHandler;
pub use crate::locker::{NopLocker, SemaphoreLocker, TaskLocker};
pub use crate::render::Format;

/// High-level entry point: decide between the hosted Lambda runtime and the
/// CLI based on the process environment, then block on the chosen mode.
pub async fn run(dag: Dag) -> Result<()> {
    run_with_args(dag, std::env::args().skip(1)).await
}

/// Like [`run`], but with explicit CLI arguments (without the program name).
pub async fn run_with_args(
    dag: Dag,
    args: impl IntoIterator<Item = String>,
) -> Result<()> {
    if is_faas_env(|name| std::env::var(name).ok()) {
        let handler = LambdaHandler::new(Arc::new(dag));
        return lambda::runtime::run(handler).await;
    }

    let argv = std::iter::once(dag.id().to_string()).chain(args);
    let parsed = cli::CliArgs::try_parse_from(argv)?;
    logging::init_logging(parsed.log_level)?;

    match parsed.command {
        cli::Command::Serve { port } => lambda::stub::serve(Arc::new(dag), port).await,
        cli::Command::Render { format } => {
            let mut out = String::new();
            render::render(&dag, format, &mut out)?;
            print!("{out}");
            Ok(())
        }
    }
}

/// Whether the process is running inside a hosted Lambda environment.
///
/// Pure over the variable lookup so tests can inject an environment.
fn is_faas_env(var: impl Fn(&str) -> Option<String>) -> bool {
    if var("AWS_LAMBDA_RUNTIME_API").is_some_and(|v| !v.is_empty()) {
        return true;
    }
    var("AWS_EXECUTION_ENV").is_some_and(|v| v.starts_with("AWS_Lambda"))
}
