//! Lifecycle event emission.
//!
//! The engine reports `pipeline.*` and `pipe.*` events to an [`EventSink`].
//! A sink can be given to an engine explicitly; otherwise the process-wide
//! default installed with [`set_event_sink`] is used.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the process-wide default event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-wide default event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the process-wide default event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_clear_sink() {
        let collecting = Arc::new(CollectingEventSink::new());
        set_event_sink(collecting.clone());

        get_event_sink().try_emit("pipe.started", None);
        assert_eq!(collecting.len(), 1);

        clear_event_sink();
        get_event_sink().try_emit("pipe.started", None);
        assert_eq!(collecting.len(), 1);
    }
}
