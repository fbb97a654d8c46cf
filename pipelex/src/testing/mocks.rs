//! Mock step handlers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::handlers::{StepBindings, StepHandler};

/// A handler that records calls and returns a configurable value.
#[derive(Debug)]
pub struct MockHandler {
    output: Mutex<serde_json::Value>,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl MockHandler {
    /// Creates a mock returning `output`.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output: Mutex::new(output),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the value to return.
    pub fn set_output(&self, output: serde_json::Value) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the handler was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the raw inputs of each call.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<serde_json::Value> {
        self.calls.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl StepHandler for MockHandler {
    async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        self.calls.lock().push(bindings.to_json());
        Ok(self.output.lock().clone())
    }
}

/// Returns its only input's raw value, or an object of all inputs.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl StepHandler for EchoHandler {
    async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        let mut inputs = bindings.inputs().values();
        match (inputs.next(), inputs.next()) {
            (Some(only), None) => Ok(only.to_json()),
            _ => Ok(bindings.to_json()),
        }
    }
}

/// A handler that always fails.
#[derive(Debug)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    /// Creates a handler failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepHandler for FailingHandler {
    async fn run(&self, _bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// A handler that sleeps before returning a value.
#[derive(Debug)]
pub struct SlowHandler {
    delay: Duration,
    output: serde_json::Value,
    completed: Mutex<usize>,
}

impl SlowHandler {
    /// Creates a handler returning `output` after `delay`.
    #[must_use]
    pub fn new(delay: Duration, output: serde_json::Value) -> Self {
        Self {
            delay,
            output,
            completed: Mutex::new(0),
        }
    }

    /// Number of calls that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }
}

#[async_trait]
impl StepHandler for SlowHandler {
    async fn run(&self, _bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        tokio::time::sleep(self.delay).await;
        *self.completed.lock() += 1;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stuff::Stuff;
    use std::collections::BTreeMap;

    fn bindings(values: &[(&str, &str)]) -> StepBindings {
        let inputs: BTreeMap<String, Stuff> = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), Stuff::text("Text", *v)))
            .collect();
        StepBindings::detached("test", inputs)
    }

    #[tokio::test]
    async fn test_mock_handler_records_calls() {
        let handler = MockHandler::new(serde_json::json!("out"));
        let out = handler.run(&bindings(&[("a", "1")])).await.unwrap();

        assert_eq!(out, serde_json::json!("out"));
        assert_eq!(handler.call_count(), 1);
        assert_eq!(handler.recorded_inputs()[0], serde_json::json!({"a": "1"}));

        handler.reset();
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let single = EchoHandler.run(&bindings(&[("a", "1")])).await.unwrap();
        assert_eq!(single, serde_json::json!("1"));

        let many = EchoHandler
            .run(&bindings(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        assert_eq!(many, serde_json::json!({"a": "1", "b": "2"}));
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let err = FailingHandler::new("boom")
            .run(&bindings(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler() {
        let handler = SlowHandler::new(Duration::from_secs(5), serde_json::json!(1));
        handler.run(&bindings(&[])).await.unwrap();
        assert_eq!(handler.completed(), 1);
    }
}
