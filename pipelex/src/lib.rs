//! # Pipelex
//!
//! A typed pipe registry and asynchronous execution engine for declarative
//! pipelines.
//!
//! Pipelex provides:
//!
//! - **Concepts**: named data types with optional schemas and refinement
//! - **Stuff**: immutable, concept-tagged values flowing between pipes
//! - **Pipes**: atomic steps backed by pluggable handlers, composed in
//!   sequence, in parallel or in batches
//! - **Strict binding**: inputs are validated before any step runs
//! - **Event-driven observability**: lifecycle events and `tracing` spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipelex::prelude::*;
//!
//! let library = Library::builder()
//!     .concept(Concept::refining("Pipelex tutor", "Text"))?
//!     .concept(Concept::refining("tagline", "Text"))?
//!     .handler("tutor", Arc::new(my_handler))?
//!     .pipe(
//!         PipeDefinition::atomic("44dmd", "tutor", "tagline")
//!             .with_input("description", "Pipelex tutor"),
//!     )
//!     .build()?;
//! Pipelex::make(library);
//!
//! let inputs = PipelineInputs::new()
//!     .with_input("description", "Pipelex tutor", json!("A patient tutor"));
//! let tagline = execute_pipeline("44dmd", inputs).await?;
//! println!("{}", tagline.as_str()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod concepts;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod library;
pub mod observability;
pub mod pipes;
pub mod runtime;
pub mod stuff;
pub mod testing;

pub use runtime::{execute_pipeline, run_pipeline, Pipelex};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::concepts::{
        Concept, ConceptRegistry, ConceptRequirement, ConceptSchema, FieldSpec,
    };
    pub use crate::config::{EngineConfig, LoggingConfig, PipelexConfig};
    pub use crate::context::{PipeRunContext, RunIdentity, WorkingMemory};
    pub use crate::engine::{PipeOutput, PipelineEngine, PipelineInputs, RawInput, RunOptions};
    pub use crate::errors::{ErrorPhase, PipelexError, PipeRunError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::handlers::{AsyncFnHandler, FnHandler, HandlerRegistry, StepBindings, StepHandler};
    pub use crate::library::{Library, LibraryBuilder};
    pub use crate::pipes::{ParallelOutput, PipeDefinition, PipeKind, PipeRegistry, SubPipe};
    pub use crate::runtime::{execute_pipeline, run_pipeline, Pipelex};
    pub use crate::stuff::{Provenance, Stuff, StuffContent};
}
