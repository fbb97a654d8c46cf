//! Strict input binding.
//!
//! Top-level inputs arrive as raw JSON and are validated into Stuff before
//! any step runs. Sub-pipe inputs are read from the caller's working memory.

use crate::concepts::{ConceptRegistry, ConceptRequirement};
use crate::context::WorkingMemory;
use crate::errors::{
    InputConceptMismatchError, MissingInputError, PipelexError, UnexpectedInputError,
};
use crate::pipes::{PipeDefinition, SubPipe};
use crate::stuff::{Provenance, Stuff};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw input value, optionally tagged with a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInput {
    /// Concept to tag the content with. Defaults to the declared concept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    /// Raw content.
    pub content: serde_json::Value,
}

impl RawInput {
    /// Untagged content.
    #[must_use]
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            concept: None,
            content,
        }
    }

    /// Content tagged with `concept`.
    #[must_use]
    pub fn tagged(concept: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            concept: Some(concept.into()),
            content,
        }
    }
}

/// Named raw inputs of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineInputs {
    inputs: BTreeMap<String, RawInput>,
}

impl PipelineInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"name": {"concept": ..., "content": ...}}`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelexError> {
        serde_json::from_value(value).map_err(|e| PipelexError::Serialization(e.to_string()))
    }

    /// Adds an input tagged with `concept`.
    #[must_use]
    pub fn with_input(
        mut self,
        name: impl Into<String>,
        concept: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        self.insert(name, RawInput::tagged(concept, content));
        self
    }

    /// Adds an untagged input; it takes the declared concept.
    #[must_use]
    pub fn with_content(mut self, name: impl Into<String>, content: serde_json::Value) -> Self {
        self.insert(name, RawInput::new(content));
        self
    }

    /// Inserts or replaces an input.
    pub fn insert(&mut self, name: impl Into<String>, input: RawInput) {
        self.inputs.insert(name.into(), input);
    }

    /// Looks an input up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RawInput> {
        self.inputs.get(name)
    }

    /// Input names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.inputs.keys().map(String::as_str).collect()
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Binds the raw inputs of a run against the signature of `pipe`.
///
/// Every declared input must be supplied and no other input may be. A
/// supplied concept tag must be the declared concept or a refinement of it.
/// Content is validated against the effective concept.
pub fn bind_pipeline_inputs(
    pipe: &PipeDefinition,
    inputs: &PipelineInputs,
    concepts: &ConceptRegistry,
    provenance: &Provenance,
) -> Result<BTreeMap<String, Stuff>, PipelexError> {
    for (name, required) in &pipe.inputs {
        if inputs.get(name).is_none() {
            return Err(MissingInputError::new(&pipe.code, name).into());
        }
        tracing::trace!(pipe = %pipe.code, input = %name, requirement = %required, "input present");
    }
    if let Some(extra) = inputs.names().into_iter().find(|n| !pipe.inputs.contains_key(*n)) {
        return Err(UnexpectedInputError::new(&pipe.code, extra).into());
    }

    let mut bound = BTreeMap::new();
    for (name, required) in &pipe.inputs {
        let Some(raw) = inputs.get(name) else {
            continue;
        };
        let requirement = match &raw.concept {
            Some(tag) => {
                concepts
                    .resolve(tag)
                    .map_err(|e| {
                        e.referenced_by(format!("input '{name}' of '{}'", pipe.code))
                            .at_binding()
                    })?;
                if !concepts.is_compatible(tag, &required.concept) {
                    return Err(InputConceptMismatchError {
                        pipe_code: pipe.code.clone(),
                        input: name.clone(),
                        expected: required.to_string(),
                        actual: tag.clone(),
                    }
                    .into());
                }
                required.with_concept(tag.clone())
            }
            None => required.clone(),
        };
        let stuff = concepts
            .build_stuff(&raw.content, &requirement, provenance)?
            .with_name(name.clone());
        bound.insert(name.clone(), stuff);
    }
    Ok(bound)
}

/// Binds the parameters of `callee` for one sub-pipe call.
///
/// Each parameter is read from `memory` under the name the call maps it to.
/// `item` overrides one parameter with a batch element.
pub fn bind_call(
    callee: &PipeDefinition,
    call: &SubPipe,
    memory: &WorkingMemory,
    item: Option<(&str, &Stuff)>,
    concepts: &ConceptRegistry,
) -> Result<BTreeMap<String, Stuff>, PipelexError> {
    let mut bound = BTreeMap::new();
    for (param, required) in &callee.inputs {
        let stuff = match item {
            Some((item_param, stuff)) if item_param == param => stuff,
            _ => memory
                .get(call.source_for(param))
                .ok_or_else(|| MissingInputError::new(&callee.code, param))?,
        };
        check_requirement(concepts, &callee.code, param, &stuff.requirement(), required)?;
        bound.insert(param.clone(), stuff.with_name(param.clone()));
    }
    Ok(bound)
}

fn check_requirement(
    concepts: &ConceptRegistry,
    pipe_code: &str,
    input: &str,
    actual: &ConceptRequirement,
    required: &ConceptRequirement,
) -> Result<(), InputConceptMismatchError> {
    if concepts.is_requirement_compatible(actual, required) {
        Ok(())
    } else {
        Err(InputConceptMismatchError {
            pipe_code: pipe_code.to_string(),
            input: input.to_string(),
            expected: required.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::Concept;
    use crate::errors::ErrorPhase;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn concepts() -> ConceptRegistry {
        let mut concepts = ConceptRegistry::new();
        concepts
            .register(Concept::refining("Pipelex tutor", "Text"))
            .unwrap();
        concepts
            .register(Concept::refining("Expert tutor", "Pipelex tutor"))
            .unwrap();
        concepts
    }

    fn pipe() -> PipeDefinition {
        PipeDefinition::atomic("44dmd", "tutor", "tagline").with_input("description", "Pipelex tutor")
    }

    fn bind(inputs: &PipelineInputs) -> Result<BTreeMap<String, Stuff>, PipelexError> {
        bind_pipeline_inputs(&pipe(), inputs, &concepts(), &Provenance::literal())
    }

    #[test]
    fn test_bind_success() {
        let inputs =
            PipelineInputs::new().with_input("description", "Pipelex tutor", json!("A tutor"));
        let bound = bind(&inputs).unwrap();
        let stuff = &bound["description"];
        assert_eq!(stuff.concept(), "Pipelex tutor");
        assert_eq!(stuff.name(), Some("description"));
        assert_eq!(stuff.as_str().unwrap(), "A tutor");
    }

    #[test]
    fn test_untagged_input_takes_declared_concept() {
        let inputs = PipelineInputs::new().with_content("description", json!("A tutor"));
        let bound = bind(&inputs).unwrap();
        assert_eq!(bound["description"].concept(), "Pipelex tutor");
    }

    #[test]
    fn test_refined_tag_is_kept() {
        let inputs =
            PipelineInputs::new().with_input("description", "Expert tutor", json!("A tutor"));
        let bound = bind(&inputs).unwrap();
        assert_eq!(bound["description"].concept(), "Expert tutor");
    }

    #[test]
    fn test_missing_input() {
        let err = bind(&PipelineInputs::new()).unwrap_err();
        assert!(
            matches!(err, PipelexError::MissingInput(ref e) if e.input == "description" && e.pipe_code == "44dmd")
        );
    }

    #[test]
    fn test_unexpected_input() {
        let inputs = PipelineInputs::new()
            .with_content("description", json!("A tutor"))
            .with_content("extra", json!("x"));
        let err = bind(&inputs).unwrap_err();
        assert!(matches!(err, PipelexError::UnexpectedInput(ref e) if e.input == "extra"));
    }

    #[test]
    fn test_concept_mismatch() {
        let inputs = PipelineInputs::new().with_input("description", "Text", json!("A tutor"));
        let err = bind(&inputs).unwrap_err();
        assert!(matches!(err, PipelexError::InputConceptMismatch(ref e) if e.actual == "Text"));
    }

    #[test]
    fn test_unknown_tag() {
        let inputs = PipelineInputs::new().with_input("description", "Ghost", json!("A tutor"));
        let err = bind(&inputs).unwrap_err();
        assert!(matches!(err, PipelexError::UnknownConcept(ref e) if e.concept == "Ghost"));
        assert_eq!(err.phase(), ErrorPhase::Binding);
    }

    #[test]
    fn test_invalid_content() {
        let inputs = PipelineInputs::new().with_input("description", "Pipelex tutor", json!(42));
        let err = bind(&inputs).unwrap_err();
        assert!(matches!(err, PipelexError::ConceptValidation(ref e) if e.path == "$"));
    }

    #[test]
    fn test_from_json() {
        let inputs = PipelineInputs::from_json(json!({
            "description": {"concept": "Pipelex tutor", "content": "A tutor"}
        }))
        .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(
            inputs.get("description").unwrap().concept.as_deref(),
            Some("Pipelex tutor")
        );

        let err = PipelineInputs::from_json(json!({"description": "no envelope"})).unwrap_err();
        assert!(matches!(err, PipelexError::Serialization(_)));
    }

    #[test]
    fn test_bind_call_uses_mapping_and_item() {
        let concepts = concepts();
        let mut memory = WorkingMemory::new();
        memory.add("article", Stuff::text("Text", "body")).unwrap();

        let callee = PipeDefinition::atomic("pair", "echo", "Text")
            .with_input("text", "Text")
            .with_input("item", "Text");
        let call = SubPipe::new("pair").with_input("text", "article");
        let item = Stuff::text("Text", "one");

        let bound = bind_call(&callee, &call, &memory, Some(("item", &item)), &concepts).unwrap();
        assert_eq!(bound["text"].as_str().unwrap(), "body");
        assert_eq!(bound["text"].name(), Some("text"));
        assert_eq!(bound["item"].as_str().unwrap(), "one");

        let err = bind_call(&callee, &call, &memory, None, &concepts).unwrap_err();
        assert!(matches!(err, PipelexError::MissingInput(ref e) if e.input == "item"));
    }

    #[test]
    fn test_bind_call_checks_concepts() {
        let concepts = concepts();
        let mut memory = WorkingMemory::new();
        memory.add("text", Stuff::text("Text", "plain")).unwrap();

        let callee = PipeDefinition::atomic("t", "echo", "Text").with_input("text", "Pipelex tutor");
        let err = bind_call(&callee, &SubPipe::new("t"), &memory, None, &concepts).unwrap_err();
        assert!(matches!(err, PipelexError::InputConceptMismatch(ref e) if e.expected == "Pipelex tutor"));
    }
}
