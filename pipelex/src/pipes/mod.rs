//! Pipes: registered units of execution addressed by a stable code.

mod definition;
mod registry;

pub use definition::{ParallelOutput, PipeDefinition, PipeKind, SubPipe};
pub use registry::PipeRegistry;
