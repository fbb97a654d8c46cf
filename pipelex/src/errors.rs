//! Error types for the pipelex engine.
//!
//! Every failure condition has its own error struct; [`PipelexError`]
//! aggregates them so callers can propagate with `?` and still match on the
//! precise condition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for pipelex operations.
#[derive(Debug, Error)]
pub enum PipelexError {
    /// A concept name was registered twice with different declarations.
    #[error("{0}")]
    DuplicateConcept(#[from] DuplicateConceptError),

    /// A concept declaration is malformed.
    #[error("{0}")]
    InvalidConcept(#[from] InvalidConceptError),

    /// A concept name could not be resolved.
    #[error("{0}")]
    UnknownConcept(#[from] UnknownConceptError),

    /// Content does not conform to a concept schema.
    #[error("{0}")]
    ConceptValidation(#[from] ConceptValidationError),

    /// A pipe code was registered twice.
    #[error("{0}")]
    DuplicatePipeCode(#[from] DuplicatePipeCodeError),

    /// A pipe definition has invalid wiring.
    #[error("{0}")]
    InvalidWiring(#[from] InvalidWiringError),

    /// A step handler tag was registered twice.
    #[error("{0}")]
    DuplicateStepHandler(#[from] DuplicateStepHandlerError),

    /// An atomic pipe references an unknown step handler.
    #[error("{0}")]
    UnknownStepHandler(#[from] UnknownStepHandlerError),

    /// A pipe code could not be resolved.
    #[error("{0}")]
    UnknownPipeCode(#[from] UnknownPipeCodeError),

    /// A declared input was not supplied.
    #[error("{0}")]
    MissingInput(#[from] MissingInputError),

    /// An input was supplied that the pipe does not declare.
    #[error("{0}")]
    UnexpectedInput(#[from] UnexpectedInputError),

    /// An input is tagged with a concept the pipe does not accept.
    #[error("{0}")]
    InputConceptMismatch(#[from] InputConceptMismatchError),

    /// A pipe produced output that does not match its declared concept.
    #[error("{0}")]
    OutputConceptMismatch(#[from] OutputConceptMismatchError),

    /// A step handler failed.
    #[error("{0}")]
    StepExecution(#[from] StepExecutionError),

    /// A name was bound twice in the same working-memory frame.
    #[error("{0}")]
    NameConflict(#[from] NameConflictError),

    /// A Stuff accessor was used on an incompatible Stuff.
    #[error("{0}")]
    ConceptExtraction(#[from] ConceptExtractionError),

    /// The process-wide engine was used before initialization.
    #[error("{0}")]
    EngineNotInitialized(#[from] EngineNotInitializedError),

    /// A failure inside a running pipeline, with the lineage that led to it.
    #[error("{0}")]
    PipeRun(#[from] PipeRunError),

    /// Nested pipe invocations went deeper than allowed.
    #[error("Maximum pipe depth ({max_depth}) exceeded while entering '{pipe_code}'")]
    MaxDepthExceeded {
        /// The pipe that could not be entered.
        pipe_code: String,
        /// The configured limit.
        max_depth: u32,
    },

    /// The run was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The phase of the engine lifecycle an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    /// Detected while building registries, before any run starts.
    Registration,
    /// Detected while binding inputs, before any step runs.
    Binding,
    /// Detected while a pipeline is running.
    Execution,
    /// Detected while projecting a result.
    Extraction,
    /// Engine lifecycle misuse or environment failures.
    Lifecycle,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Binding => write!(f, "binding"),
            Self::Execution => write!(f, "execution"),
            Self::Extraction => write!(f, "extraction"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

impl PipelexError {
    /// Returns the innermost error, unwrapping any pipeline lineage.
    #[must_use]
    pub fn root_cause(&self) -> &PipelexError {
        let mut current = self;
        while let Self::PipeRun(run) = current {
            current = run.source.as_ref();
        }
        current
    }

    /// Returns the lineage of pipe codes leading to the failure, if the error
    /// was raised inside a running pipeline.
    #[must_use]
    pub fn lineage(&self) -> Option<&[String]> {
        match self {
            Self::PipeRun(run) => Some(&run.lineage),
            _ => None,
        }
    }

    /// Classifies the root cause of this error.
    #[must_use]
    pub fn phase(&self) -> ErrorPhase {
        match self.root_cause() {
            Self::UnknownConcept(e) => e.phase,
            Self::DuplicateConcept(_)
            | Self::InvalidConcept(_)
            | Self::DuplicatePipeCode(_)
            | Self::InvalidWiring(_)
            | Self::DuplicateStepHandler(_)
            | Self::UnknownStepHandler(_) => ErrorPhase::Registration,
            Self::UnknownPipeCode(_)
            | Self::MissingInput(_)
            | Self::UnexpectedInput(_)
            | Self::InputConceptMismatch(_)
            | Self::ConceptValidation(_) => ErrorPhase::Binding,
            Self::OutputConceptMismatch(_)
            | Self::StepExecution(_)
            | Self::NameConflict(_)
            | Self::MaxDepthExceeded { .. }
            | Self::Cancelled(_)
            | Self::PipeRun(_) => ErrorPhase::Execution,
            Self::ConceptExtraction(_) => ErrorPhase::Extraction,
            Self::EngineNotInitialized(_) | Self::Serialization(_) | Self::Io(_) => {
                ErrorPhase::Lifecycle
            }
        }
    }
}

/// Metadata about a registration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "WIRING-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            fix_hint: ErrorSuggestions::get(&code).map(String::from),
            code,
            summary: summary.into(),
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        map
    }
}

/// Error raised when a concept name is registered twice with different declarations.
#[derive(Debug, Clone, Error)]
#[error("Concept '{concept}' is already registered with a different declaration")]
pub struct DuplicateConceptError {
    /// The conflicting concept name.
    pub concept: String,
}

impl DuplicateConceptError {
    /// Creates a new duplicate concept error.
    #[must_use]
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
        }
    }
}

/// Error raised when a concept declaration is malformed.
#[derive(Debug, Clone, Error)]
#[error("Invalid concept '{concept}': {reason}")]
pub struct InvalidConceptError {
    /// The concept name.
    pub concept: String,
    /// What is wrong with it.
    pub reason: String,
}

impl InvalidConceptError {
    /// Creates a new invalid concept error.
    #[must_use]
    pub fn new(concept: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a concept name cannot be resolved.
#[derive(Debug, Clone, Error)]
#[error("Unknown concept '{concept}'{}", referenced_by.as_ref().map(|r| format!(" (referenced by '{r}')")).unwrap_or_default())]
pub struct UnknownConceptError {
    /// The unresolved concept name.
    pub concept: String,
    /// The concept or pipe holding the reference, when known.
    pub referenced_by: Option<String>,
    /// Where the reference was resolved.
    pub phase: ErrorPhase,
}

impl UnknownConceptError {
    /// Creates a new unknown concept error.
    #[must_use]
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            referenced_by: None,
            phase: ErrorPhase::Registration,
        }
    }

    /// Marks the error as raised by a caller-supplied input tag.
    #[must_use]
    pub fn at_binding(mut self) -> Self {
        self.phase = ErrorPhase::Binding;
        self
    }

    /// Records what referenced the missing concept.
    #[must_use]
    pub fn referenced_by(mut self, owner: impl Into<String>) -> Self {
        self.referenced_by = Some(owner.into());
        self
    }
}

/// Error raised when content does not conform to a concept schema.
#[derive(Debug, Clone, Error)]
#[error("Content at '{path}' does not conform to concept '{concept}': {reason}")]
pub struct ConceptValidationError {
    /// The concept being checked at the failing location.
    pub concept: String,
    /// JSON path of the failing value (`$` is the root).
    pub path: String,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConceptValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(
        concept: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            concept: concept.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a pipe code is registered twice.
#[derive(Debug, Clone, Error)]
#[error("Pipe code '{pipe_code}' is already registered")]
pub struct DuplicatePipeCodeError {
    /// The conflicting pipe code.
    pub pipe_code: String,
}

impl DuplicatePipeCodeError {
    /// Creates a new duplicate pipe code error.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
        }
    }
}

/// Error raised when a pipe definition is malformed or its data flow is invalid.
#[derive(Debug, Clone, Error)]
#[error("Invalid wiring in pipe '{pipe_code}': {message}")]
pub struct InvalidWiringError {
    /// The pipe whose definition is invalid.
    pub pipe_code: String,
    /// The error message.
    pub message: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl InvalidWiringError {
    /// Creates a new wiring error with a diagnostic code.
    #[must_use]
    pub fn new(
        pipe_code: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let pipe_code = pipe_code.into();
        let message = message.into();
        let error_info =
            ErrorInfo::new(code, message.clone()).with_context_entry("pipe", pipe_code.clone());
        Self {
            pipe_code,
            message,
            error_info,
        }
    }

    /// Returns the diagnostic code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }
}

/// Error raised when a cycle is detected in the pipe call graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipe graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of pipe codes forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for InvalidWiringError {
    fn from(err: CycleDetectedError) -> Self {
        let pipe_code = err.cycle_path.first().cloned().unwrap_or_default();
        InvalidWiringError::new(pipe_code, "WIRING-CYCLE", err.to_string())
    }
}

/// Error raised when a step handler tag is registered twice.
#[derive(Debug, Clone, Error)]
#[error("Step handler '{handler}' is already registered")]
pub struct DuplicateStepHandlerError {
    /// The conflicting handler tag.
    pub handler: String,
}

/// Error raised when an atomic pipe references an unknown step handler.
#[derive(Debug, Clone, Error)]
#[error("Pipe '{pipe_code}' references unknown step handler '{handler}'")]
pub struct UnknownStepHandlerError {
    /// The pipe holding the reference.
    pub pipe_code: String,
    /// The unresolved handler tag.
    pub handler: String,
}

/// Error raised when a pipe code cannot be resolved.
#[derive(Debug, Clone, Error)]
#[error("Unknown pipe code '{pipe_code}'")]
pub struct UnknownPipeCodeError {
    /// The unresolved pipe code.
    pub pipe_code: String,
}

impl UnknownPipeCodeError {
    /// Creates a new unknown pipe code error.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
        }
    }
}

/// Error raised when a declared input was not supplied.
#[derive(Debug, Clone, Error)]
#[error("Pipe '{pipe_code}' requires input '{input}' which was not supplied")]
pub struct MissingInputError {
    /// The pipe being bound.
    pub pipe_code: String,
    /// The missing input name.
    pub input: String,
}

impl MissingInputError {
    /// Creates a new missing input error.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            input: input.into(),
        }
    }
}

/// Error raised when an input is supplied that the pipe does not declare.
#[derive(Debug, Clone, Error)]
#[error("Pipe '{pipe_code}' does not declare input '{input}'")]
pub struct UnexpectedInputError {
    /// The pipe being bound.
    pub pipe_code: String,
    /// The unexpected input name.
    pub input: String,
}

impl UnexpectedInputError {
    /// Creates a new unexpected input error.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            input: input.into(),
        }
    }
}

/// Error raised when an input carries a concept the pipe does not accept.
#[derive(Debug, Clone, Error)]
#[error("Input '{input}' of pipe '{pipe_code}' expects concept '{expected}' but got '{actual}'")]
pub struct InputConceptMismatchError {
    /// The pipe being bound.
    pub pipe_code: String,
    /// The input name.
    pub input: String,
    /// The declared requirement.
    pub expected: String,
    /// The supplied concept.
    pub actual: String,
}

/// Error raised when a pipe's result does not match its declared output.
#[derive(Debug, Clone, Error)]
#[error("Pipe '{pipe_code}' declares output '{expected}' but produced {actual}")]
pub struct OutputConceptMismatchError {
    /// The pipe that produced the output.
    pub pipe_code: String,
    /// The declared output requirement.
    pub expected: String,
    /// Description of what was produced instead.
    pub actual: String,
}

/// Error raised when a step handler fails.
#[derive(Debug, Error)]
#[error("Step '{handler}' of pipe '{pipe_code}' failed: {source}")]
pub struct StepExecutionError {
    /// The atomic pipe whose step failed.
    pub pipe_code: String,
    /// The handler tag.
    pub handler: String,
    /// The underlying cause.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl StepExecutionError {
    /// Creates a new step execution error from a handler failure.
    #[must_use]
    pub fn new(
        pipe_code: impl Into<String>,
        handler: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            handler: handler.into(),
            source: source.into(),
        }
    }
}

/// Error raised when a name is bound twice in one working-memory frame.
#[derive(Debug, Clone, Error)]
#[error("Name conflict: '{name}' is already bound in this frame")]
pub struct NameConflictError {
    /// The conflicting name.
    pub name: String,
}

impl NameConflictError {
    /// Creates a new name conflict error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Error raised when a Stuff cannot be projected the way the caller asked.
#[derive(Debug, Clone, Error)]
#[error("Cannot view stuff of concept '{concept}' as {requested}: {reason}")]
pub struct ConceptExtractionError {
    /// The concept of the Stuff.
    pub concept: String,
    /// The requested projection.
    pub requested: String,
    /// Why the projection is not possible.
    pub reason: String,
}

impl ConceptExtractionError {
    /// Creates a new extraction error.
    #[must_use]
    pub fn new(
        concept: impl Into<String>,
        requested: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            concept: concept.into(),
            requested: requested.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the process-wide engine is used before `Pipelex::make`.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("Pipelex is not initialized: call Pipelex::make before executing pipelines")]
pub struct EngineNotInitializedError;

/// A failure raised inside a running pipeline.
#[derive(Debug, Error)]
#[error("Pipeline '{pipe_code}' failed at {}: {source}", lineage.join(" > "))]
pub struct PipeRunError {
    /// The top-level pipe code.
    pub pipe_code: String,
    /// Pipe codes from the top-level pipe to the one that failed.
    pub lineage: Vec<String>,
    /// The underlying error.
    pub source: Box<PipelexError>,
}

impl PipeRunError {
    /// Wraps an error raised at the end of `lineage`.
    #[must_use]
    pub fn new(lineage: Vec<String>, source: PipelexError) -> Self {
        Self {
            pipe_code: lineage.first().cloned().unwrap_or_default(),
            lineage,
            source: Box::new(source),
        }
    }

    /// Returns the code of the pipe that failed.
    #[must_use]
    pub fn failed_pipe(&self) -> Option<&str> {
        self.lineage.last().map(String::as_str)
    }
}

/// Provides default suggestions for registration error codes.
pub struct ErrorSuggestions;

impl ErrorSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "WIRING-CYCLE" => Some(
                "A pipe ends up calling itself. Break the cycle by splitting one of the pipes.",
            ),
            "WIRING-UNDECLARED" => Some(
                "Every name a step reads must be a declared input of the enclosing pipe \
                 or the result of an earlier step.",
            ),
            "WIRING-DANGLING" => Some(
                "Register every sub-pipe before finalizing the library. Check for typos in pipe codes.",
            ),
            "WIRING-DUPLICATE-RESULT" => {
                Some("Give each step of a composite pipe a distinct result name.")
            }
            "WIRING-CONCEPT" => Some(
                "The value wired into a sub-pipe input must carry the declared concept or refine it.",
            ),
            "PIPE-INVALID-CODE" => {
                Some("Pipe codes use lowercase letters, digits and underscores only.")
            }
            "WIRING-OUTPUT" => Some(
                "A parallel output must name one branch result, or combine the branches \
                 into a structured concept whose fields are the branch results.",
            ),
            "WIRING-BATCH" => Some(
                "A batch pipe iterates a declared list input, feeds each item to the branch \
                 parameter named by input_item, and declares a list output.",
            ),
            "PIPE-EMPTY" => Some("Add at least one step to the composite pipe."),
            _ => None,
        }
    }
}
