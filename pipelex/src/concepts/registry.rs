//! The concept registry: declaration, resolution and content validation.

use super::concept::{
    Concept, ConceptRequirement, ConceptSchema, Multiplicity, NATIVE_ANYTHING, NATIVE_NAMESPACE,
};
use crate::errors::{
    ConceptValidationError, DuplicateConceptError, InvalidConceptError, PipelexError,
    UnknownConceptError,
};
use crate::stuff::{Provenance, Stuff, StuffContent};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::debug;

static CONCEPT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z][a-z0-9_]*\.)?[A-Za-z][A-Za-z0-9 _-]*$")
        .expect("valid concept name pattern")
});

/// Registry of declared concepts.
///
/// Populated during the load phase, then shared read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ConceptRegistry {
    concepts: HashMap<String, Arc<Concept>>,
}

impl Default for ConceptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConceptRegistry {
    /// Creates a registry holding only the native concepts.
    #[must_use]
    pub fn new() -> Self {
        let concepts = Concept::natives()
            .into_iter()
            .map(|c| (c.code.clone(), Arc::new(c)))
            .collect();
        Self { concepts }
    }

    /// Registers a concept.
    ///
    /// Re-registering a concept with the same schema and parent is a no-op,
    /// whatever its description says.
    pub fn register(&mut self, concept: Concept) -> Result<(), PipelexError> {
        Self::check_declaration(&concept)?;

        if let Some(existing) = self.concepts.get(&concept.code) {
            if existing.schema == concept.schema && existing.refines == concept.refines {
                return Ok(());
            }
            return Err(DuplicateConceptError::new(&concept.code).into());
        }
        if concept.is_native() {
            return Err(InvalidConceptError::new(
                &concept.code,
                format!("the '{NATIVE_NAMESPACE}' namespace is reserved"),
            )
            .into());
        }

        debug!(concept = %concept.code, "Registered concept");
        self.concepts.insert(concept.code.clone(), Arc::new(concept));
        Ok(())
    }

    fn check_declaration(concept: &Concept) -> Result<(), PipelexError> {
        let code = &concept.code;
        if code.trim() != code || !CONCEPT_NAME.is_match(code) {
            return Err(InvalidConceptError::new(code, "invalid concept name").into());
        }
        if concept.schema.is_some() && concept.refines.is_some() {
            return Err(InvalidConceptError::new(
                code,
                "a concept cannot both declare a schema and refine another",
            )
            .into());
        }
        if concept.refines.as_deref() == Some(code.as_str()) {
            return Err(InvalidConceptError::new(code, "a concept cannot refine itself").into());
        }
        Ok(())
    }

    /// Returns the canonical name for `name`, following native aliases.
    ///
    /// `Text` resolves to `native.Text` unless a concept named `Text` exists.
    #[must_use]
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        if let Some((code, _)) = self.concepts.get_key_value(name) {
            return Some(code.as_str());
        }
        let native = format!("{NATIVE_NAMESPACE}.{name}");
        self.concepts.get_key_value(&native).map(|(code, _)| code.as_str())
    }

    /// Resolves a concept by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<Concept>, UnknownConceptError> {
        self.canonical_name(name)
            .and_then(|code| self.concepts.get(code))
            .cloned()
            .ok_or_else(|| UnknownConceptError::new(name))
    }

    /// Returns true if `name` resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.canonical_name(name).is_some()
    }

    /// Number of registered concepts, natives included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    /// Returns true if no concepts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Registered concept names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.concepts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Canonical names of `name` and its ancestors, nearest first.
    fn lineage(&self, name: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.canonical_name(name);
        while let Some(code) = current {
            if chain.contains(&code) {
                break;
            }
            chain.push(code);
            current = self
                .concepts
                .get(code)
                .and_then(|c| c.refines.as_deref())
                .and_then(|parent| self.canonical_name(parent));
        }
        chain
    }

    /// The schema governing `name`: its own, or the nearest ancestor's.
    ///
    /// `None` means the concept is opaque.
    #[must_use]
    pub fn effective_schema(&self, name: &str) -> Option<&ConceptSchema> {
        self.lineage(name)
            .into_iter()
            .find_map(|code| self.concepts.get(code).and_then(|c| c.schema.as_ref()))
    }

    /// Returns true if a value of `actual` may be used where `required` is expected.
    ///
    /// Holds for the same concept, for any declared descendant of `required`,
    /// and for every concept when `required` is `native.Anything`.
    #[must_use]
    pub fn is_compatible(&self, actual: &str, required: &str) -> bool {
        let Some(required) = self.canonical_name(required) else {
            return false;
        };
        if required == NATIVE_ANYTHING {
            return self.contains(actual);
        }
        self.lineage(actual).contains(&required)
    }

    /// Requirement-level compatibility: same multiplicity, compatible concepts.
    #[must_use]
    pub fn is_requirement_compatible(
        &self,
        actual: &ConceptRequirement,
        required: &ConceptRequirement,
    ) -> bool {
        actual.multiplicity == required.multiplicity
            && self.is_compatible(&actual.concept, &required.concept)
    }

    /// Returns true if `content` conforms to `concept`.
    #[must_use]
    pub fn validate(&self, content: &serde_json::Value, concept: &str) -> bool {
        self.build_content(content, &ConceptRequirement::single(concept))
            .is_ok()
    }

    /// Builds the typed content tree for `raw` under `requirement`.
    pub fn build_content(
        &self,
        raw: &serde_json::Value,
        requirement: &ConceptRequirement,
    ) -> Result<StuffContent, PipelexError> {
        Ok(self
            .build_stuff(raw, requirement, &Provenance::literal())?
            .content()
            .clone())
    }

    /// Builds a Stuff for `raw` under `requirement`, validating it on the way.
    ///
    /// Sub-values inherit `provenance`. The Stuff is tagged with the canonical
    /// concept name; list requirements produce list content.
    pub fn build_stuff(
        &self,
        raw: &serde_json::Value,
        requirement: &ConceptRequirement,
        provenance: &Provenance,
    ) -> Result<Stuff, PipelexError> {
        self.build_at(raw, requirement, provenance, "$")
    }

    fn build_at(
        &self,
        raw: &serde_json::Value,
        requirement: &ConceptRequirement,
        provenance: &Provenance,
        path: &str,
    ) -> Result<Stuff, PipelexError> {
        let concept = self
            .canonical_name(&requirement.concept)
            .ok_or_else(|| UnknownConceptError::new(&requirement.concept))?
            .to_string();

        let content = match requirement.multiplicity {
            Multiplicity::List => {
                let items = raw.as_array().ok_or_else(|| {
                    ConceptValidationError::new(
                        &concept,
                        path,
                        format!("expected a list, got {}", json_kind(raw)),
                    )
                })?;
                let item_requirement = ConceptRequirement::single(concept.clone());
                StuffContent::List(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.build_at(item, &item_requirement, provenance, &format!("{path}[{i}]"))
                        })
                        .collect::<Result<_, _>>()?,
                )
            }
            Multiplicity::Single => self.build_single(raw, &concept, provenance, path)?,
        };

        Ok(Stuff::new(concept, content).with_provenance(provenance.clone()))
    }

    fn build_single(
        &self,
        raw: &serde_json::Value,
        concept: &str,
        provenance: &Provenance,
        path: &str,
    ) -> Result<StuffContent, PipelexError> {
        let mismatch = |expected: &str| -> PipelexError {
            ConceptValidationError::new(
                concept,
                path,
                format!("expected {expected}, got {}", json_kind(raw)),
            )
            .into()
        };

        let Some(schema) = self.effective_schema(concept) else {
            return Ok(StuffContent::Opaque(raw.clone()));
        };
        match (schema, raw) {
            (ConceptSchema::Text, serde_json::Value::String(s)) => Ok(StuffContent::Text(s.clone())),
            (ConceptSchema::Text, _) => Err(mismatch("a string")),
            (ConceptSchema::Number, serde_json::Value::Number(n)) => {
                Ok(StuffContent::Number(n.clone()))
            }
            (ConceptSchema::Number, _) => Err(mismatch("a number")),
            (ConceptSchema::Boolean, serde_json::Value::Bool(b)) => Ok(StuffContent::Boolean(*b)),
            (ConceptSchema::Boolean, _) => Err(mismatch("a boolean")),
            (ConceptSchema::Structure { fields }, serde_json::Value::Object(object)) => {
                if let Some(extra) = object.keys().find(|k| !fields.contains_key(*k)) {
                    return Err(ConceptValidationError::new(
                        concept,
                        format!("{path}.{extra}"),
                        "unexpected field",
                    )
                    .into());
                }
                let mut built = std::collections::BTreeMap::new();
                for (name, spec) in fields {
                    let field_path = format!("{path}.{name}");
                    match object.get(name) {
                        Some(value) => {
                            let sub = self
                                .build_at(value, &spec.concept, provenance, &field_path)?
                                .with_name(name.clone());
                            built.insert(name.clone(), sub);
                        }
                        None if spec.required => {
                            return Err(ConceptValidationError::new(
                                concept,
                                field_path,
                                "missing required field",
                            )
                            .into());
                        }
                        None => {}
                    }
                }
                Ok(StuffContent::Structured(built))
            }
            (ConceptSchema::Structure { .. }, _) => Err(mismatch("an object")),
        }
    }

    /// Checks that every `refines` target and field concept resolves and that
    /// no refinement chain loops.
    pub fn check_references(&self) -> Result<(), PipelexError> {
        let mut codes: Vec<&String> = self.concepts.keys().collect();
        codes.sort();

        for code in codes {
            let concept = &self.concepts[code];
            if let Some(parent) = &concept.refines {
                if !self.contains(parent) {
                    return Err(UnknownConceptError::new(parent).referenced_by(code).into());
                }
            }
            if let Some(ConceptSchema::Structure { fields }) = &concept.schema {
                for spec in fields.values() {
                    if !self.contains(&spec.concept.concept) {
                        return Err(UnknownConceptError::new(&spec.concept.concept)
                            .referenced_by(code)
                            .into());
                    }
                }
            }
            self.check_refinement_chain(code)?;
        }
        Ok(())
    }

    fn check_refinement_chain(&self, code: &str) -> Result<(), PipelexError> {
        let mut seen = HashSet::new();
        let mut current = Some(code);
        while let Some(name) = current {
            if !seen.insert(name) {
                return Err(InvalidConceptError::new(code, "refinement chain forms a cycle").into());
            }
            current = self
                .concepts
                .get(name)
                .and_then(|c| c.refines.as_deref())
                .and_then(|parent| self.canonical_name(parent));
        }
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}
