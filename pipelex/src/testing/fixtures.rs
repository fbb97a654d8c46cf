//! Fixture libraries for pipeline testing.

use std::sync::Arc;

use crate::concepts::{Concept, FieldSpec};
use crate::engine::PipelineInputs;
use crate::errors::PipelexError;
use crate::handlers::{FnHandler, StepBindings, StepHandler};
use crate::library::{Library, LibraryBuilder};
use crate::pipes::{ParallelOutput, PipeDefinition, SubPipe};

/// Code of the tutor tagline pipe.
pub const TUTOR_PIPE: &str = "44dmd";

/// Concept of the tutor description input.
pub const TUTOR_CONCEPT: &str = "Pipelex tutor";

/// Output concept of the tutor pipe.
pub const TAGLINE_CONCEPT: &str = "tagline";

/// A handler that writes a tagline from a `description` input.
#[must_use]
pub fn tagline_handler() -> Arc<dyn StepHandler> {
    Arc::new(FnHandler::new(|bindings: &StepBindings| {
        let description = bindings.require_str("description")?;
        Ok(serde_json::json!(format!(
            "{}: learn it one pipe at a time",
            description.trim()
        )))
    }))
}

/// Builder preloaded with the tutor concepts and the `44dmd` pipe, whose
/// step is served by `handler` under the tag `tutor`.
pub fn tutor_builder(handler: Arc<dyn StepHandler>) -> Result<LibraryBuilder, PipelexError> {
    Ok(Library::builder()
        .concept(
            Concept::refining(TUTOR_CONCEPT, "Text")
                .with_description("Description of a tutor for the Pipelex language"),
        )?
        .concept(Concept::refining(TAGLINE_CONCEPT, "Text").with_description("A short tagline"))?
        .handler("tutor", handler)?
        .pipe(
            PipeDefinition::atomic(TUTOR_PIPE, "tutor", TAGLINE_CONCEPT)
                .with_input("description", TUTOR_CONCEPT)
                .with_description("Write a tagline for a tutor"),
        ))
}

/// The tutor library served by `handler`.
pub fn tutor_library(handler: Arc<dyn StepHandler>) -> Result<Library, PipelexError> {
    tutor_builder(handler)?.build()
}

/// Inputs for the tutor pipe.
#[must_use]
pub fn tutor_inputs(description: &str) -> PipelineInputs {
    PipelineInputs::new().with_input(
        "description",
        TUTOR_CONCEPT,
        serde_json::json!(description),
    )
}

/// A library exercising every composite kind.
///
/// * `upper` / `lower`: atomic text transforms.
/// * `shout_twice`: sequence `upper` then `upper` again.
/// * `both_cases`: parallel `upper` + `lower` combined into a `Cases`.
/// * `upper_all`: batch `upper` over a `Text[]`.
pub fn composite_library() -> Result<Library, PipelexError> {
    let upper = FnHandler::new(|b: &StepBindings| {
        Ok(serde_json::json!(b.require_str("text")?.to_uppercase()))
    });
    let lower = FnHandler::new(|b: &StepBindings| {
        Ok(serde_json::json!(b.require_str("text")?.to_lowercase()))
    });

    Library::builder()
        .concept(Concept::structured(
            "Cases",
            [
                ("upper", FieldSpec::required("Text")),
                ("lower", FieldSpec::required("Text")),
            ],
        ))?
        .handler("upper", Arc::new(upper))?
        .handler("lower", Arc::new(lower))?
        .pipe(PipeDefinition::atomic("upper", "upper", "Text").with_input("text", "Text"))
        .pipe(PipeDefinition::atomic("lower", "lower", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::sequence(
                "shout_twice",
                vec![
                    SubPipe::new("upper").with_result("first"),
                    SubPipe::new("upper")
                        .with_result("second")
                        .with_input("text", "first"),
                ],
                "Text",
            )
            .with_input("text", "Text"),
        )
        .pipe(
            PipeDefinition::parallel(
                "both_cases",
                vec![SubPipe::new("upper"), SubPipe::new("lower")],
                ParallelOutput::Combined,
                "Cases",
            )
            .with_input("text", "Text"),
        )
        .pipe(
            PipeDefinition::batch("upper_all", SubPipe::new("upper"), "texts", "text", "Text[]")
                .with_input("texts", "Text[]"),
        )
        .build()
}
