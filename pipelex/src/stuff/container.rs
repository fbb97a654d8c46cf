//! The Stuff container and its accessors.

use super::{Provenance, StuffContent};
use crate::concepts::ConceptRequirement;
use crate::errors::ConceptExtractionError;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An immutable, concept-tagged value.
///
/// Cloning shares the underlying nodes. Equality compares concept, name and
/// content; provenance is ignored.
#[derive(Debug, Clone)]
pub struct Stuff {
    concept: Arc<str>,
    name: Option<Arc<str>>,
    content: Arc<StuffContent>,
    provenance: Arc<Provenance>,
}

impl Stuff {
    /// Creates an unnamed Stuff with literal provenance.
    ///
    /// The content is not checked against the concept; use the concept
    /// registry to build validated Stuff.
    #[must_use]
    pub fn new(concept: impl Into<String>, content: StuffContent) -> Self {
        Self {
            concept: Arc::from(concept.into()),
            name: None,
            content: Arc::new(content),
            provenance: Arc::new(Provenance::literal()),
        }
    }

    /// Shorthand for a Stuff with text content.
    #[must_use]
    pub fn text(concept: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(concept, StuffContent::Text(text.into()))
    }

    /// Returns a copy carrying `name`.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: Some(Arc::from(name.into())),
            ..self.clone()
        }
    }

    /// Returns a copy carrying `provenance`.
    #[must_use]
    pub fn with_provenance(&self, provenance: Provenance) -> Self {
        Self {
            provenance: Arc::new(provenance),
            ..self.clone()
        }
    }

    /// Canonical concept name.
    #[must_use]
    pub fn concept(&self) -> &str {
        &self.concept
    }

    /// The name under which this Stuff is addressed, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The content tree.
    #[must_use]
    pub fn content(&self) -> &StuffContent {
        &self.content
    }

    /// Provenance metadata.
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Returns true if the content is a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(*self.content, StuffContent::List(_))
    }

    /// The concept requirement this Stuff satisfies exactly.
    #[must_use]
    pub fn requirement(&self) -> ConceptRequirement {
        if self.is_list() {
            ConceptRequirement::list(self.concept())
        } else {
            ConceptRequirement::single(self.concept())
        }
    }

    /// Re-extracts the raw JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.content.to_json()
    }

    /// Stable SHA-256 hex fingerprint of concept and content.
    #[must_use]
    pub fn digest(&self) -> String {
        let canonical = self.fingerprint_value().to_string();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    fn fingerprint_value(&self) -> serde_json::Value {
        let content = match self.content() {
            StuffContent::Structured(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, stuff)| (name.clone(), stuff.fingerprint_value()))
                    .collect(),
            ),
            StuffContent::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::fingerprint_value).collect())
            }
            other => other.to_json(),
        };
        serde_json::json!({
            "concept": self.concept(),
            "kind": self.content.kind(),
            "content": content,
        })
    }

    fn extraction_error(&self, requested: &str, reason: impl Into<String>) -> ConceptExtractionError {
        ConceptExtractionError::new(self.concept(), requested, reason)
    }

    /// Views the Stuff as a string.
    ///
    /// Text content is returned as is. A structured Stuff with exactly one
    /// field delegates to that field.
    pub fn as_str(&self) -> Result<&str, ConceptExtractionError> {
        match self.content() {
            StuffContent::Text(text) => Ok(text),
            StuffContent::Opaque(serde_json::Value::String(text)) => Ok(text),
            StuffContent::Structured(fields) if fields.len() == 1 => fields
                .values()
                .next()
                .ok_or_else(|| self.extraction_error("str", "no field"))?
                .as_str()
                .map_err(|e| self.extraction_error("str", e.reason)),
            StuffContent::Structured(fields) => Err(self.extraction_error(
                "str",
                format!("structured content has {} fields", fields.len()),
            )),
            other => Err(self.extraction_error("str", format!("content is {}", other.kind()))),
        }
    }

    /// Views the Stuff as a number.
    pub fn as_number(&self) -> Result<f64, ConceptExtractionError> {
        match self.content() {
            StuffContent::Number(n) | StuffContent::Opaque(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| self.extraction_error("number", "not representable as f64")),
            other => Err(self.extraction_error("number", format!("content is {}", other.kind()))),
        }
    }

    /// Views the Stuff as a boolean.
    pub fn as_bool(&self) -> Result<bool, ConceptExtractionError> {
        match self.content() {
            StuffContent::Boolean(b) | StuffContent::Opaque(serde_json::Value::Bool(b)) => Ok(*b),
            other => Err(self.extraction_error("bool", format!("content is {}", other.kind()))),
        }
    }

    /// Views the Stuff as a list declared as `concept[]`.
    ///
    /// The list's own tag is checked. Items may carry refinements of it.
    /// Bare native names (`Text`) match their `native.` form.
    pub fn as_list_of(&self, concept: &str) -> Result<&[Stuff], ConceptExtractionError> {
        let requested = format!("{concept}[]");
        let StuffContent::List(items) = self.content() else {
            return Err(self.extraction_error(
                &requested,
                format!("content is {}", self.content.kind()),
            ));
        };
        let actual = self.concept();
        let matches = actual == concept
            || actual
                .strip_prefix("native.")
                .is_some_and(|bare| bare == concept);
        if !matches {
            return Err(self.extraction_error(
                &requested,
                format!("list items are '{actual}'"),
            ));
        }
        Ok(items)
    }

    /// Views a structured Stuff as its named fields.
    pub fn as_mapping(&self) -> Result<&BTreeMap<String, Stuff>, ConceptExtractionError> {
        match self.content() {
            StuffContent::Structured(fields) => Ok(fields),
            other => Err(self.extraction_error("mapping", format!("content is {}", other.kind()))),
        }
    }

    /// Returns one field of a structured Stuff.
    pub fn field(&self, name: &str) -> Result<&Stuff, ConceptExtractionError> {
        self.as_mapping()?
            .get(name)
            .ok_or_else(|| self.extraction_error("mapping", format!("no field '{name}'")))
    }
}

impl PartialEq for Stuff {
    fn eq(&self, other: &Self) -> bool {
        self.concept == other.concept && self.name == other.name && self.content == other.content
    }
}

impl Serialize for Stuff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Stuff", 4)?;
        state.serialize_field("concept", self.concept())?;
        state.serialize_field("name", &self.name())?;
        state.serialize_field("content", &self.to_json())?;
        state.serialize_field("provenance", self.provenance())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stuff::Origin;
    use pretty_assertions::assert_eq;

    fn tagline(text: &str) -> Stuff {
        Stuff::text("tagline", text)
    }

    fn structured(fields: &[(&str, Stuff)]) -> Stuff {
        Stuff::new(
            "Summary",
            StuffContent::Structured(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.clone()))
                    .collect(),
            ),
        )
    }

    #[test]
    fn test_as_str_on_text() {
        let stuff = tagline("Learn pipelines fast");
        assert_eq!(stuff.as_str().unwrap(), "Learn pipelines fast");
    }

    #[test]
    fn test_as_str_single_field_delegates() {
        let stuff = structured(&[("content", tagline("hello"))]);
        assert_eq!(stuff.as_str().unwrap(), "hello");
    }

    #[test]
    fn test_as_str_multi_field_fails() {
        let stuff = structured(&[("a", tagline("x")), ("b", tagline("y"))]);
        let err = stuff.as_str().unwrap_err();
        assert_eq!(err.concept, "Summary");
        assert!(err.reason.contains("2 fields"));
    }

    #[test]
    fn test_as_list_of() {
        let list = Stuff::new(
            "tagline",
            StuffContent::List(vec![tagline("a"), tagline("b")]),
        );
        let items = list.as_list_of("tagline").unwrap();
        assert_eq!(items.len(), 2);
        assert!(list.as_list_of("Summary").is_err());
        assert!(tagline("a").as_list_of("tagline").is_err());
    }

    #[test]
    fn test_as_list_of_native_alias() {
        let list = Stuff::new(
            "native.Text",
            StuffContent::List(vec![Stuff::text("native.Text", "x")]),
        );
        assert_eq!(list.as_list_of("Text").unwrap().len(), 1);
    }

    #[test]
    fn test_as_list_of_with_refined_items() {
        let list = Stuff::new(
            "native.Text",
            StuffContent::List(vec![tagline("a"), Stuff::text("native.Text", "b")]),
        );
        let items = list.as_list_of("Text").unwrap();
        assert_eq!(items[0].concept(), "tagline");
        assert_eq!(items[1].as_str().unwrap(), "b");
        assert!(list.as_list_of("tagline").is_err());
    }

    #[test]
    fn test_as_mapping_and_field() {
        let stuff = structured(&[("title", tagline("t"))]);
        assert_eq!(stuff.as_mapping().unwrap().len(), 1);
        assert_eq!(stuff.field("title").unwrap().as_str().unwrap(), "t");
        assert!(stuff.field("body").is_err());
        assert!(tagline("x").as_mapping().is_err());
    }

    #[test]
    fn test_scalar_accessors() {
        let number = Stuff::new("native.Number", StuffContent::Number(serde_json::Number::from(42_i64)));
        assert_eq!(number.as_number().unwrap(), 42.0);
        assert!(number.as_bool().is_err());

        let flag = Stuff::new("native.Boolean", StuffContent::Boolean(true));
        assert!(flag.as_bool().unwrap());
        assert!(flag.as_str().is_err());
    }

    #[test]
    fn test_equality_ignores_provenance() {
        let a = tagline("same");
        let b = tagline("same").with_provenance(Provenance::pipe("p", uuid::Uuid::new_v4()));
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(b.provenance().origin, Origin::Pipe("p".to_string()));
    }

    #[test]
    fn test_rename_returns_new_stuff() {
        let original = tagline("x");
        let renamed = original.with_name("headline");
        assert_eq!(original.name(), None);
        assert_eq!(renamed.name(), Some("headline"));
        assert_ne!(original, renamed);
        assert_eq!(original.digest(), renamed.digest());
    }

    #[test]
    fn test_digest_depends_on_concept() {
        assert_ne!(
            tagline("x").digest(),
            Stuff::text("native.Text", "x").digest()
        );
        assert_eq!(tagline("x").digest().len(), 64);
    }

    #[test]
    fn test_to_json_and_serialize() {
        let stuff = structured(&[("content", tagline("hello"))]).with_name("summary");
        assert_eq!(stuff.to_json(), serde_json::json!({"content": "hello"}));

        let value = serde_json::to_value(&stuff).unwrap();
        assert_eq!(value["concept"], "Summary");
        assert_eq!(value["name"], "summary");
        assert_eq!(value["provenance"]["origin"]["kind"], "literal");
    }
}
