//! Tracker for in-flight pipe invocations.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Information about one running pipe invocation.
#[derive(Debug, Clone)]
pub struct InvocationInfo {
    /// Tracker id of this invocation.
    pub invocation_id: Uuid,
    /// Tracker id of the calling invocation.
    pub parent_invocation_id: Option<Uuid>,
    /// Pipeline run the invocation belongs to.
    pub pipeline_run_id: Uuid,
    /// Code of the running pipe.
    pub pipe_code: String,
    /// Nesting depth; the top-level pipe has depth 1.
    pub depth: usize,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
}

/// Thread-safe registry of running invocations.
#[derive(Debug, Default)]
pub struct RunTracker {
    active: DashMap<Uuid, InvocationInfo>,
}

impl RunTracker {
    /// Creates a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an invocation. It stays tracked until the guard is dropped.
    #[must_use]
    pub fn track(
        self: &Arc<Self>,
        pipeline_run_id: Uuid,
        parent_invocation_id: Option<Uuid>,
        pipe_code: impl Into<String>,
        depth: usize,
    ) -> InvocationGuard {
        let info = InvocationInfo {
            invocation_id: Uuid::new_v4(),
            parent_invocation_id,
            pipeline_run_id,
            pipe_code: pipe_code.into(),
            depth,
            started_at: Utc::now(),
        };
        let invocation_id = info.invocation_id;
        self.active.insert(invocation_id, info);
        InvocationGuard {
            tracker: Arc::clone(self),
            invocation_id,
        }
    }

    /// Gets information about a running invocation.
    #[must_use]
    pub fn get(&self, invocation_id: Uuid) -> Option<InvocationInfo> {
        self.active.get(&invocation_id).map(|e| e.value().clone())
    }

    /// Running invocations of one pipeline run, shallowest first.
    #[must_use]
    pub fn active_for_run(&self, pipeline_run_id: Uuid) -> Vec<InvocationInfo> {
        let mut infos: Vec<InvocationInfo> = self
            .active
            .iter()
            .filter(|e| e.pipeline_run_id == pipeline_run_id)
            .map(|e| e.value().clone())
            .collect();
        infos.sort_by_key(|info| (info.depth, info.started_at));
        infos
    }

    /// Running invocations called by `parent_invocation_id`.
    #[must_use]
    pub fn children_of(&self, parent_invocation_id: Uuid) -> Vec<InvocationInfo> {
        self.active
            .iter()
            .filter(|e| e.parent_invocation_id == Some(parent_invocation_id))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Number of running invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Removes its invocation from the tracker when dropped.
#[derive(Debug)]
pub struct InvocationGuard {
    tracker: Arc<RunTracker>,
    invocation_id: Uuid,
}

impl InvocationGuard {
    /// Tracker id of the guarded invocation.
    #[must_use]
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        self.tracker.active.remove(&self.invocation_id);
    }
}
