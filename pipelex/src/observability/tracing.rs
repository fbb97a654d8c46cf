//! Tracing integration for pipe runs.

use crate::config::{LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Span attributes for a top-level pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpanAttributes {
    /// Top-level pipe code.
    pub pipe_code: Option<String>,
    /// Pipeline run ID.
    pub pipeline_run_id: Option<String>,
    /// Request ID.
    pub request_id: Option<String>,
    /// Number of bound inputs.
    pub input_count: Option<usize>,
}

impl PipelineSpanAttributes {
    /// Creates empty pipeline span attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the top-level pipe code.
    #[must_use]
    pub fn with_pipe_code(mut self, code: impl Into<String>) -> Self {
        self.pipe_code = Some(code.into());
        self
    }

    /// Sets the pipeline run ID.
    #[must_use]
    pub fn with_pipeline_run_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_run_id = Some(id.into());
        self
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Sets the number of bound inputs.
    #[must_use]
    pub fn with_input_count(mut self, count: usize) -> Self {
        self.input_count = Some(count);
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        if let Some(ref v) = self.pipe_code {
            attrs.insert("pipeline.pipe_code".to_string(), v.clone());
        }
        if let Some(ref v) = self.pipeline_run_id {
            attrs.insert("pipeline.run_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.request_id {
            attrs.insert("pipeline.request_id".to_string(), v.clone());
        }
        if let Some(v) = self.input_count {
            attrs.insert("pipeline.input_count".to_string(), v.to_string());
        }
        attrs
    }
}

/// Span attributes for one pipe invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipeSpanAttributes {
    /// Pipe code.
    pub pipe_code: String,
    /// Pipe kind (`atomic`, `sequence`, `parallel`, `batch`).
    pub kind: Option<String>,
    /// Nesting depth, 1 for the top-level pipe.
    pub depth: Option<usize>,
    /// Final status.
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Output concept.
    pub output_concept: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl PipeSpanAttributes {
    /// Creates attributes for a pipe.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            ..Default::default()
        }
    }

    /// Sets the pipe kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the nesting depth.
    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the output concept.
    #[must_use]
    pub fn with_output_concept(mut self, concept: impl Into<String>) -> Self {
        self.output_concept = Some(concept.into());
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("pipe.code".to_string(), self.pipe_code.clone());
        if let Some(ref v) = self.kind {
            attrs.insert("pipe.kind".to_string(), v.clone());
        }
        if let Some(v) = self.depth {
            attrs.insert("pipe.depth".to_string(), v.to_string());
        }
        if let Some(ref v) = self.status {
            attrs.insert("pipe.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("pipe.duration_ms".to_string(), v.to_string());
        }
        if let Some(ref v) = self.output_concept {
            attrs.insert("pipe.output_concept".to_string(), v.clone());
        }
        if let Some(ref v) = self.error {
            attrs.insert("pipe.error".to_string(), v.clone());
        }
        attrs
    }

    /// Converts to a JSON event payload.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

/// Installs a global `tracing` subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` when a
/// global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(span_events);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
