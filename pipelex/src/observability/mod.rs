//! Observability utilities: span attributes, timing and log subscriber setup.

mod tracing;

pub use self::tracing::{init_logging, PipeSpanAttributes, PipelineSpanAttributes, SpanTimer};
