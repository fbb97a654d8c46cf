//! Pipeline execution.
//!
//! This module provides:
//! - Strict binding of raw inputs to typed Stuff
//! - The [`PipelineEngine`] dispatching atomic, sequence, parallel and batch pipes
//! - Run outputs and a tracker of in-flight invocations

mod binding;
mod executor;
#[cfg(test)]
mod integration_tests;
mod output;
mod tracker;

pub use binding::{bind_call, bind_pipeline_inputs, PipelineInputs, RawInput};
pub use executor::{PipelineEngine, RunOptions};
pub use output::PipeOutput;
pub use tracker::{InvocationGuard, InvocationInfo, RunTracker};
