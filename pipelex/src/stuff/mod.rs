//! Stuff: immutable, concept-tagged values exchanged between pipes.
//!
//! A [`Stuff`] pairs a concept name with a [`StuffContent`] tree. Nodes are
//! shared, so cloning or renaming a Stuff never copies its content.

mod container;
mod content;

pub use container::Stuff;
pub use content::{Origin, Provenance, StuffContent};
