//! Step handlers: the pluggable capabilities behind atomic pipes.
//!
//! A handler is registered under a tag. Atomic pipes name the tag, and the
//! pipe registry resolves it when the pipe is registered.

mod bindings;

pub use bindings::StepBindings;

use crate::errors::DuplicateStepHandlerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A capability that computes the raw result of an atomic pipe.
///
/// The returned JSON is validated against the pipe's declared output concept
/// by the engine.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Runs the step on its bound inputs.
    async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value>;
}

/// A synchronous closure handler.
pub struct FnHandler<F>
where
    F: Fn(&StepBindings) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&StepBindings) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnHandler<F>
where
    F: Fn(&StepBindings) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&StepBindings) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        (self.func)(bindings)
    }
}

/// An async closure handler. The closure receives owned bindings.
pub struct AsyncFnHandler<F, Fut>
where
    F: Fn(StepBindings) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnHandler<F, Fut>
where
    F: Fn(StepBindings) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    /// Wraps an async closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnHandler<F, Fut>
where
    F: Fn(StepBindings) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> StepHandler for AsyncFnHandler<F, Fut>
where
    F: Fn(StepBindings) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value> {
        (self.func)(bindings.clone()).await
    }
}

/// Table of step handlers by tag.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `tag`.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), DuplicateStepHandlerError> {
        let tag = tag.into();
        if self.handlers.contains_key(&tag) {
            return Err(DuplicateStepHandlerError { handler: tag });
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// Returns the handler registered under `tag`.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(tag).cloned()
    }

    /// Returns true if `tag` is registered.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
