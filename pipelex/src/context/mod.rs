//! Execution context for pipe invocations.
//!
//! This module provides:
//! - Run identity for correlating events
//! - Layered working memory of named Stuff
//! - Per-invocation contexts that share run state

mod execution;
mod identity;
mod memory;

pub use execution::{PipeRunContext, RunState};
pub use identity::RunIdentity;
pub use memory::WorkingMemory;
