//! Result of a pipeline run.

use crate::context::{RunIdentity, WorkingMemory};
use crate::errors::ConceptExtractionError;
use crate::stuff::Stuff;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// The output of a successful pipeline run.
///
/// Holds the main Stuff produced by the top-level pipe together with the
/// final working memory of that pipe.
#[derive(Debug, Clone)]
pub struct PipeOutput {
    /// Code of the top-level pipe.
    pub pipe_code: String,
    /// Identity of the run.
    pub identity: RunIdentity,
    /// The Stuff produced by the top-level pipe.
    pub main_stuff: Stuff,
    /// Final working memory of the top-level pipe.
    pub working_memory: WorkingMemory,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl PipeOutput {
    /// The main Stuff.
    #[must_use]
    pub fn main_stuff(&self) -> &Stuff {
        &self.main_stuff
    }

    /// Consumes the output, returning the main Stuff.
    #[must_use]
    pub fn into_main_stuff(self) -> Stuff {
        self.main_stuff
    }

    /// The main Stuff as text.
    pub fn main_stuff_as_str(&self) -> Result<&str, ConceptExtractionError> {
        self.main_stuff.as_str()
    }

    /// The main Stuff as a list of `concept`.
    pub fn main_stuff_as_list_of(&self, concept: &str) -> Result<&[Stuff], ConceptExtractionError> {
        self.main_stuff.as_list_of(concept)
    }

    /// The main Stuff as a field mapping.
    pub fn main_stuff_as_mapping(
        &self,
    ) -> Result<&BTreeMap<String, Stuff>, ConceptExtractionError> {
        self.main_stuff.as_mapping()
    }

    /// Looks a name up in the final working memory.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Stuff> {
        self.working_memory.get(name)
    }

    /// JSON summary of the run.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "pipe_code": self.pipe_code,
            "pipeline_run_id": self.identity.pipeline_run_id.to_string(),
            "concept": self.main_stuff.concept(),
            "digest": self.main_stuff.digest(),
            "memory": self.working_memory.names(),
            "started_at": self.started_at.to_rfc3339(),
            "duration_ms": self.duration_ms,
        })
    }
}
