//! Load-phase assembly of concepts, handlers and pipes.
//!
//! A [`LibraryBuilder`] collects declarations; [`LibraryBuilder::build`]
//! validates them as a whole and freezes them into an immutable [`Library`].

use crate::concepts::{Concept, ConceptRegistry};
use crate::errors::PipelexError;
use crate::handlers::{HandlerRegistry, StepHandler};
use crate::pipes::{PipeDefinition, PipeRegistry};
use std::sync::Arc;
use tracing::info;

/// Frozen registries shared by every run.
#[derive(Debug, Clone)]
pub struct Library {
    concepts: Arc<ConceptRegistry>,
    handlers: Arc<HandlerRegistry>,
    pipes: Arc<PipeRegistry>,
}

impl Library {
    /// Starts a new library.
    #[must_use]
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::new()
    }

    /// The concept registry.
    #[must_use]
    pub fn concepts(&self) -> &ConceptRegistry {
        &self.concepts
    }

    /// The step-handler registry.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// The pipe registry.
    #[must_use]
    pub fn pipes(&self) -> &PipeRegistry {
        &self.pipes
    }
}

/// Builder for a [`Library`].
#[derive(Debug, Default)]
pub struct LibraryBuilder {
    concepts: ConceptRegistry,
    handlers: HandlerRegistry,
    pipes: Vec<PipeDefinition>,
}

impl LibraryBuilder {
    /// Creates a builder holding only the native concepts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            concepts: ConceptRegistry::new(),
            handlers: HandlerRegistry::new(),
            pipes: Vec::new(),
        }
    }

    /// Declares a concept.
    ///
    /// # Errors
    ///
    /// Returns an error if the concept is malformed or conflicts with an
    /// earlier declaration.
    pub fn concept(mut self, concept: Concept) -> Result<Self, PipelexError> {
        self.concepts.register(concept)?;
        Ok(self)
    }

    /// Registers a step handler under `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is already taken.
    pub fn handler(
        mut self,
        tag: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<Self, PipelexError> {
        self.handlers.register(tag, handler)?;
        Ok(self)
    }

    /// Adds a pipe. Pipes are registered in declaration order by
    /// [`build`](Self::build), once every handler is known.
    #[must_use]
    pub fn pipe(mut self, definition: PipeDefinition) -> Self {
        self.pipes.push(definition);
        self
    }

    /// Validates everything and freezes the library.
    ///
    /// # Errors
    ///
    /// Returns the first registration or wiring error found.
    pub fn build(self) -> Result<Library, PipelexError> {
        self.concepts.check_references()?;

        let handlers = Arc::new(self.handlers);
        let mut pipes = PipeRegistry::new(Arc::clone(&handlers));
        for definition in self.pipes {
            pipes.register(definition)?;
        }
        pipes.validate_all(&self.concepts)?;

        info!(
            concepts = self.concepts.len(),
            handlers = handlers.tags().len(),
            pipes = pipes.len(),
            "Library loaded"
        );

        Ok(Library {
            concepts: Arc::new(self.concepts),
            handlers,
            pipes: Arc::new(pipes),
        })
    }
}
