//! Concept declarations and concept requirements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Namespace of the built-in concepts.
pub const NATIVE_NAMESPACE: &str = "native";
/// Built-in text concept.
pub const NATIVE_TEXT: &str = "native.Text";
/// Built-in number concept.
pub const NATIVE_NUMBER: &str = "native.Number";
/// Built-in boolean concept.
pub const NATIVE_BOOLEAN: &str = "native.Boolean";
/// Built-in opaque concept that every concept is compatible with.
pub const NATIVE_ANYTHING: &str = "native.Anything";

/// Whether a requirement expects one value or an ordered list of values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// Exactly one value.
    #[default]
    Single,
    /// An ordered list of values.
    List,
}

/// A reference to a concept with a multiplicity.
///
/// Written `"Concept"` for a single value and `"Concept[]"` for a list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConceptRequirement {
    /// Referenced concept name.
    pub concept: String,
    /// Expected multiplicity.
    pub multiplicity: Multiplicity,
}

impl ConceptRequirement {
    /// A single value of `concept`.
    #[must_use]
    pub fn single(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            multiplicity: Multiplicity::Single,
        }
    }

    /// A list of values of `concept`.
    #[must_use]
    pub fn list(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            multiplicity: Multiplicity::List,
        }
    }

    /// Returns true for list requirements.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.multiplicity == Multiplicity::List
    }

    /// Returns the same requirement with another concept name.
    #[must_use]
    pub fn with_concept(&self, concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            multiplicity: self.multiplicity,
        }
    }
}

impl FromStr for ConceptRequirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, multiplicity) = match s.strip_suffix("[]") {
            Some(inner) => (inner, Multiplicity::List),
            None => (s, Multiplicity::Single),
        };
        if name.is_empty() {
            return Err(format!("empty concept requirement '{s}'"));
        }
        Ok(Self {
            concept: name.to_string(),
            multiplicity,
        })
    }
}

impl TryFrom<String> for ConceptRequirement {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConceptRequirement> for String {
    fn from(value: ConceptRequirement) -> Self {
        value.to_string()
    }
}

impl From<&str> for ConceptRequirement {
    fn from(value: &str) -> Self {
        value
            .parse()
            .unwrap_or_else(|_| Self::single(value.to_string()))
    }
}

impl fmt::Display for ConceptRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.multiplicity {
            Multiplicity::Single => write!(f, "{}", self.concept),
            Multiplicity::List => write!(f, "{}[]", self.concept),
        }
    }
}

/// A named field of a structured concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Concept (and multiplicity) of the field value.
    pub concept: ConceptRequirement,
    /// Whether the field must be present.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    /// A required field.
    #[must_use]
    pub fn required(concept: impl Into<ConceptRequirement>) -> Self {
        Self {
            concept: concept.into(),
            required: true,
            description: None,
        }
    }

    /// An optional field.
    #[must_use]
    pub fn optional(concept: impl Into<ConceptRequirement>) -> Self {
        Self {
            concept: concept.into(),
            required: false,
            description: None,
        }
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The structural schema of a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConceptSchema {
    /// A string.
    Text,
    /// A JSON number.
    Number,
    /// A boolean.
    Boolean,
    /// A mapping of named fields.
    Structure {
        /// Declared fields, by name.
        fields: BTreeMap<String, FieldSpec>,
    },
}

impl ConceptSchema {
    /// Short name of the schema kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Structure { .. } => "structure",
        }
    }

    /// Builds a structure schema from `(name, field)` pairs.
    #[must_use]
    pub fn structure<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSpec)>,
        K: Into<String>,
    {
        Self::Structure {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A named data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Unique concept name.
    pub code: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Own schema. Exclusive with `refines`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ConceptSchema>,
    /// Parent concept whose schema this concept inherits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refines: Option<String>,
}

impl Concept {
    /// Creates an opaque concept.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: None,
            schema: None,
            refines: None,
        }
    }

    /// Creates a concept that refines `parent`.
    #[must_use]
    pub fn refining(code: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::new(code).with_refines(parent)
    }

    /// Creates a structured concept.
    #[must_use]
    pub fn structured<I, K>(code: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSpec)>,
        K: Into<String>,
    {
        Self::new(code).with_schema(ConceptSchema::structure(fields))
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: ConceptSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the refined parent.
    #[must_use]
    pub fn with_refines(mut self, parent: impl Into<String>) -> Self {
        self.refines = Some(parent.into());
        self
    }

    /// Returns true for concepts in the `native` namespace.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.code
            .split_once('.')
            .is_some_and(|(ns, _)| ns == NATIVE_NAMESPACE)
    }

    /// The built-in concepts registered in every registry.
    #[must_use]
    pub fn natives() -> Vec<Self> {
        vec![
            Self::new(NATIVE_TEXT)
                .with_description("A text")
                .with_schema(ConceptSchema::Text),
            Self::new(NATIVE_NUMBER)
                .with_description("A number")
                .with_schema(ConceptSchema::Number),
            Self::new(NATIVE_BOOLEAN)
                .with_description("A boolean")
                .with_schema(ConceptSchema::Boolean),
            Self::new(NATIVE_ANYTHING).with_description("Any content"),
        ]
    }
}
