//! Inputs handed to a step handler.

use crate::cancellation::CancellationToken;
use crate::stuff::Stuff;
use anyhow::{anyhow, Context};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// The declared inputs of an atomic pipe, bound for one invocation.
#[derive(Debug, Clone)]
pub struct StepBindings {
    pipe_code: String,
    inputs: BTreeMap<String, Stuff>,
    run_id: Uuid,
    cancel_token: Arc<CancellationToken>,
}

impl StepBindings {
    /// Creates bindings for `pipe_code`.
    #[must_use]
    pub fn new(
        pipe_code: impl Into<String>,
        inputs: BTreeMap<String, Stuff>,
        run_id: Uuid,
        cancel_token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            inputs,
            run_id,
            cancel_token,
        }
    }

    /// Bindings outside any run, with a fresh token. Useful for calling a
    /// handler directly.
    #[must_use]
    pub fn detached(pipe_code: impl Into<String>, inputs: BTreeMap<String, Stuff>) -> Self {
        Self::new(
            pipe_code,
            inputs,
            Uuid::new_v4(),
            Arc::new(CancellationToken::new()),
        )
    }

    /// Code of the atomic pipe being executed.
    #[must_use]
    pub fn pipe_code(&self) -> &str {
        &self.pipe_code
    }

    /// Pipeline run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// All bound inputs by parameter name.
    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, Stuff> {
        &self.inputs
    }

    /// Returns an input, if bound.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Stuff> {
        self.inputs.get(name)
    }

    /// Returns an input or fails.
    pub fn require(&self, name: &str) -> anyhow::Result<&Stuff> {
        self.inputs
            .get(name)
            .ok_or_else(|| anyhow!("input '{name}' is not bound for pipe '{}'", self.pipe_code))
    }

    /// Returns an input as a string or fails.
    pub fn require_str(&self, name: &str) -> anyhow::Result<&str> {
        self.require(name)?
            .as_str()
            .with_context(|| format!("input '{name}' is not text"))
    }

    /// Raw JSON of every input, keyed by parameter name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.inputs
                .iter()
                .map(|(name, stuff)| (name.clone(), stuff.to_json()))
                .collect(),
        )
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }
}
