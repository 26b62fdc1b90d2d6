// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The CLI is only reached when the entry point does not detect a hosted
//! Lambda environment; see [`crate::run_with_args`].

use clap::{Parser, Subcommand, ValueEnum};

use crate::render::Format;

/// Command-line arguments for a relaydag binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "relaydag",
    version,
    about = "Drive a DAG of tasks to completion across Lambda invocations.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RELAYDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a stub server for the Lambda Invoke API.
    ///
    /// For local development; the aws cli can drive it with
    /// `aws lambda --endpoint http://localhost:3001 invoke --function-name <dag-id> out.json`.
    Serve {
        /// Stub server port.
        #[arg(long, default_value_t = 3001)]
        port: u16,
    },

    /// Render the DAG to stdout.
    Render {
        /// Rendering format.
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
