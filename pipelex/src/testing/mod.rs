//! Testing utilities for pipelex libraries.
//!
//! This module provides:
//! - Mock step handlers
//! - Fixture libraries and inputs
//! - Assertions for results, errors and events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_error_phase, assert_events_in_order, assert_lineage, assert_no_event,
    assert_text_stuff,
};
pub use fixtures::{
    composite_library, tagline_handler, tutor_builder, tutor_inputs, tutor_library,
    TAGLINE_CONCEPT, TUTOR_CONCEPT, TUTOR_PIPE,
};
pub use mocks::{EchoHandler, FailingHandler, MockHandler, SlowHandler};
