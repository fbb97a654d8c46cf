//! Working memory: named Stuff visible to a pipe invocation.

use crate::errors::NameConflictError;
use crate::stuff::Stuff;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A frame of named Stuff layered over an optional read-only parent.
///
/// Names are unique within a frame. A frame may shadow a parent name; the
/// parent is never modified. Snapshots share the frame until the next write.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    frame: Arc<BTreeMap<String, Stuff>>,
    parent: Option<Arc<WorkingMemory>>,
}

impl WorkingMemory {
    /// Creates an empty root memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root memory seeded with `entries`. Each Stuff is renamed to
    /// its key.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, Stuff>) -> Self {
        Self {
            frame: rename_all(entries),
            parent: None,
        }
    }

    /// Creates a child frame over `parent`, seeded with `entries`.
    #[must_use]
    pub fn child_of(parent: Arc<WorkingMemory>, entries: BTreeMap<String, Stuff>) -> Self {
        Self {
            frame: rename_all(entries),
            parent: Some(parent),
        }
    }

    /// Binds `stuff` under `name` in this frame.
    pub fn add(&mut self, name: impl Into<String>, stuff: Stuff) -> Result<(), NameConflictError> {
        let name = name.into();
        if self.frame.contains_key(&name) {
            return Err(NameConflictError::new(name));
        }
        let stuff = stuff.with_name(name.clone());
        Arc::make_mut(&mut self.frame).insert(name, stuff);
        Ok(())
    }

    /// Looks `name` up in this frame, then in the parents.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Stuff> {
        self.frame
            .get(name)
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(name)))
    }

    /// Returns true if `name` is visible.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries bound in this frame only.
    #[must_use]
    pub fn frame(&self) -> &BTreeMap<String, Stuff> {
        self.frame.as_ref()
    }

    /// The parent frame, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<WorkingMemory>> {
        self.parent.as_ref()
    }

    /// Every visible name, sorted.
    #[must_use]
    pub fn names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self
            .parent
            .as_ref()
            .map(|p| p.names())
            .unwrap_or_default();
        names.extend(self.frame.keys().map(String::as_str));
        names
    }

    /// Number of frames from this one to the root.
    #[must_use]
    pub fn layers(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.layers())
    }

    /// Freezes this memory into a shareable read-only snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<WorkingMemory> {
        Arc::new(self.clone())
    }

    /// Raw JSON of the entries of this frame.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.frame
                .iter()
                .map(|(name, stuff)| (name.clone(), stuff.to_json()))
                .collect(),
        )
    }
}

fn rename_all(entries: BTreeMap<String, Stuff>) -> Arc<BTreeMap<String, Stuff>> {
    Arc::new(
        entries
            .into_iter()
            .map(|(name, stuff)| {
                let stuff = stuff.with_name(name.clone());
                (name, stuff)
            })
            .collect(),
    )
}
