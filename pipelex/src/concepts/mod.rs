//! Concepts: named data types that type-check pipe boundaries.
//!
//! Four native concepts are always registered (`native.Text`,
//! `native.Number`, `native.Boolean`, `native.Anything`); their bare names
//! resolve to them unless a user concept takes the name.

mod concept;
mod registry;

pub use concept::{
    Concept, ConceptRequirement, ConceptSchema, FieldSpec, Multiplicity, NATIVE_ANYTHING,
    NATIVE_BOOLEAN, NATIVE_NAMESPACE, NATIVE_NUMBER, NATIVE_TEXT,
};
pub use registry::ConceptRegistry;
