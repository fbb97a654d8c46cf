//! Per-invocation execution context.

use super::identity::RunIdentity;
use super::memory::WorkingMemory;
use crate::cancellation::CancellationToken;
use crate::events::{EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// State shared by every invocation of one pipeline run.
pub struct RunState {
    identity: RunIdentity,
    event_sink: Arc<dyn EventSink>,
    cancel_token: Arc<CancellationToken>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("identity", &self.identity)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl RunState {
    /// Creates run state with the given identity, sink and token.
    #[must_use]
    pub fn new(
        identity: RunIdentity,
        event_sink: Arc<dyn EventSink>,
        cancel_token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            identity,
            event_sink,
            cancel_token,
            started_at: Utc::now(),
        }
    }

    /// The run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Emits an event enriched with the run identity.
    pub fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));

        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert(
                "pipeline_run_id".to_string(),
                serde_json::json!(self.identity.pipeline_run_id.to_string()),
            );
            if let Some(id) = self.identity.request_id {
                map.insert("request_id".to_string(), serde_json::json!(id.to_string()));
            }
        }

        self.event_sink.try_emit(event_type, Some(enriched));
    }
}

/// Context of a single pipe invocation.
///
/// A child context shares the run state with its parent and extends the
/// lineage by one pipe code. Its working memory overlays the caller's.
#[derive(Debug, Clone)]
pub struct PipeRunContext {
    run: Arc<RunState>,
    lineage: Vec<String>,
    memory: WorkingMemory,
    invocation_id: Option<Uuid>,
    parent_invocation_id: Option<Uuid>,
}

impl PipeRunContext {
    /// Creates the context of the top-level pipe of a run.
    #[must_use]
    pub fn root(run: Arc<RunState>, pipe_code: impl Into<String>, memory: WorkingMemory) -> Self {
        Self {
            run,
            lineage: vec![pipe_code.into()],
            memory,
            invocation_id: None,
            parent_invocation_id: None,
        }
    }

    /// Creates a detached root context with a fresh identity and no sink.
    #[must_use]
    pub fn detached(pipe_code: impl Into<String>) -> Self {
        let run = RunState::new(
            RunIdentity::new(),
            Arc::new(NoOpEventSink),
            Arc::new(CancellationToken::new()),
        );
        Self::root(Arc::new(run), pipe_code, WorkingMemory::new())
    }

    /// Creates the context of a sub-pipe invocation.
    #[must_use]
    pub fn child(&self, pipe_code: impl Into<String>, memory: WorkingMemory) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.push(pipe_code.into());
        Self {
            run: Arc::clone(&self.run),
            lineage,
            memory,
            invocation_id: None,
            parent_invocation_id: self.invocation_id,
        }
    }

    /// Shared run state.
    #[must_use]
    pub fn run(&self) -> &Arc<RunState> {
        &self.run
    }

    /// The run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        self.run.identity()
    }

    /// The pipeline run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run.identity.pipeline_run_id
    }

    /// Pipe codes from the top-level pipe down to this one.
    #[must_use]
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Nesting depth. The top-level pipe has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lineage.len()
    }

    /// Code of the pipe this context belongs to.
    #[must_use]
    pub fn pipe_code(&self) -> &str {
        self.lineage.last().map_or("", String::as_str)
    }

    /// The working memory.
    #[must_use]
    pub fn memory(&self) -> &WorkingMemory {
        &self.memory
    }

    /// Mutable working memory.
    pub fn memory_mut(&mut self) -> &mut WorkingMemory {
        &mut self.memory
    }

    /// Consumes the context, returning its working memory.
    #[must_use]
    pub fn into_memory(self) -> WorkingMemory {
        self.memory
    }

    /// Tracker id of this invocation, once registered.
    #[must_use]
    pub fn invocation_id(&self) -> Option<Uuid> {
        self.invocation_id
    }

    /// Tracker id of the calling invocation.
    #[must_use]
    pub fn parent_invocation_id(&self) -> Option<Uuid> {
        self.parent_invocation_id
    }

    /// Records the tracker id of this invocation.
    pub fn set_invocation_id(&mut self, id: Uuid) {
        self.invocation_id = Some(id);
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.run.cancel_token
    }

    /// Checks if the run is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run.cancel_token.is_cancelled()
    }

    /// Emits an event enriched with the run identity and this pipe's
    /// position in the lineage.
    pub fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.entry("pipe_code")
                .or_insert_with(|| serde_json::json!(self.pipe_code()));
            map.insert("depth".to_string(), serde_json::json!(self.depth()));
            map.insert("lineage".to_string(), serde_json::json!(self.lineage));
        }
        self.run.try_emit_event(event_type, Some(enriched));
    }
}
