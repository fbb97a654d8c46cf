//! Test assertions for pipeline results.

use crate::errors::{ErrorPhase, PipelexError};
use crate::events::CollectingEventSink;
use crate::stuff::Stuff;

/// Asserts that `stuff` is tagged with `concept` and holds non-empty text.
pub fn assert_text_stuff(stuff: &Stuff, concept: &str) {
    assert_eq!(
        stuff.concept(),
        concept,
        "Expected concept '{}', got '{}'",
        concept,
        stuff.concept()
    );
    match stuff.as_str() {
        Ok(text) => assert!(!text.is_empty(), "Expected non-empty text"),
        Err(e) => panic!("Expected text content: {e}"),
    }
}

/// Asserts that the innermost cause of `err` is in `phase`.
pub fn assert_error_phase(err: &PipelexError, phase: ErrorPhase) {
    assert_eq!(
        err.phase(),
        phase,
        "Expected a {} error, got: {}",
        phase,
        err
    );
}

/// Asserts that `err` was raised inside a run along `expected` lineage.
pub fn assert_lineage(err: &PipelexError, expected: &[&str]) {
    let lineage = err
        .lineage()
        .unwrap_or_else(|| panic!("Expected a pipeline run error, got: {err}"));
    assert_eq!(
        lineage, expected,
        "Expected lineage {expected:?}, got {lineage:?}"
    );
}

/// Asserts that `expected` event types were emitted in this relative order.
pub fn assert_events_in_order(sink: &CollectingEventSink, expected: &[&str]) {
    let types = sink.event_types();
    let mut remaining = types.iter();
    for event_type in expected {
        assert!(
            remaining.any(|t| t == event_type),
            "Expected event '{event_type}' in order {expected:?}, got {types:?}"
        );
    }
}

/// Asserts that no event of type `event_type` was emitted.
pub fn assert_no_event(sink: &CollectingEventSink, event_type: &str) {
    let types = sink.event_types();
    assert!(
        !types.iter().any(|t| t == event_type),
        "Expected no '{event_type}' event, got {types:?}"
    );
}
