//! Content trees and provenance metadata.

use super::Stuff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// The payload of a Stuff.
#[derive(Debug, Clone, PartialEq)]
pub enum StuffContent {
    /// A string.
    Text(String),
    /// A JSON number.
    Number(serde_json::Number),
    /// A boolean.
    Boolean(bool),
    /// Named sub-values of a structured concept.
    Structured(BTreeMap<String, Stuff>),
    /// An ordered list of values.
    List(Vec<Stuff>),
    /// Arbitrary JSON carried by an opaque concept.
    Opaque(serde_json::Value),
}

impl StuffContent {
    /// Short name of the content kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Structured(_) => "structured",
            Self::List(_) => "list",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Re-extracts the raw JSON value this content was built from.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Structured(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, stuff)| (name.clone(), stuff.to_json()))
                    .collect(),
            ),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Stuff::to_json).collect())
            }
            Self::Opaque(value) => value.clone(),
        }
    }
}

/// Where a Stuff came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pipe_code", rename_all = "snake_case")]
pub enum Origin {
    /// Bound from a caller-supplied input.
    Input,
    /// Produced by the pipe with this code.
    Pipe(String),
    /// Built directly by code outside a run.
    Literal,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Pipe(code) => write!(f, "pipe:{code}"),
            Self::Literal => write!(f, "literal"),
        }
    }
}

/// Provenance metadata. Ignored by Stuff equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Origin of the value.
    pub origin: Origin,
    /// Pipeline run that created the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Provenance {
    /// Provenance for a caller-supplied input of `run_id`.
    #[must_use]
    pub fn input(run_id: Uuid) -> Self {
        Self {
            origin: Origin::Input,
            run_id: Some(run_id),
            created_at: Utc::now(),
        }
    }

    /// Provenance for the output of `pipe_code` in `run_id`.
    #[must_use]
    pub fn pipe(pipe_code: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            origin: Origin::Pipe(pipe_code.into()),
            run_id: Some(run_id),
            created_at: Utc::now(),
        }
    }

    /// Provenance for a value built outside any run.
    #[must_use]
    pub fn literal() -> Self {
        Self {
            origin: Origin::Literal,
            run_id: None,
            created_at: Utc::now(),
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::literal()
    }
}
