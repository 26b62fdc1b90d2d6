// src/lambda/mod.rs

//! Lambda-facing surface.
//!
//! - [`handler`] adapts a [`Dag`](crate::dag::Dag) into an Invoke-API
//!   handler working on opaque JSON payloads.
//! - [`runtime`] drives the handler against the hosted Lambda
//!   custom-runtime API.
//! - [`stub`] serves a local HTTP stub of the Invoke API for development.

pub mod handler;
pub(crate) mod runtime;
pub mod stub;

pub use handler::LambdaHandler;
