//! The process-wide pipelex instance.
//!
//! A caller loads a [`Library`], installs it once with [`Pipelex::make`] and
//! then runs pipes through the free functions of this module.

use crate::config::PipelexConfig;
use crate::engine::{PipeOutput, PipelineEngine, PipelineInputs, RunOptions};
use crate::errors::{EngineNotInitializedError, PipelexError};
use crate::library::Library;
use crate::observability::init_logging;
use crate::stuff::Stuff;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

static INSTANCE: RwLock<Option<Arc<Pipelex>>> = RwLock::new(None);

/// A configured engine over a frozen library.
#[derive(Debug)]
pub struct Pipelex {
    engine: PipelineEngine,
    config: PipelexConfig,
}

impl Pipelex {
    /// Installs the process-wide instance with default configuration.
    ///
    /// Replaces any previous instance.
    pub fn make(library: Library) -> Arc<Self> {
        Self::make_with_config(library, PipelexConfig::default())
    }

    /// Installs the process-wide instance.
    ///
    /// Also installs a global `tracing` subscriber from `config.logging`
    /// unless one is already set.
    pub fn make_with_config(library: Library, config: PipelexConfig) -> Arc<Self> {
        if init_logging(&config.logging) {
            debug!(level = %config.logging.level, "Logging initialized");
        }
        let engine = PipelineEngine::new(library).with_config(config.engine.clone());
        let instance = Arc::new(Self { engine, config });

        let replaced = INSTANCE.write().replace(Arc::clone(&instance)).is_some();
        info!(
            pipes = instance.library().pipes().len(),
            replaced, "Pipelex initialized"
        );
        instance
    }

    /// Returns the process-wide instance.
    pub fn get() -> Result<Arc<Self>, EngineNotInitializedError> {
        INSTANCE.read().clone().ok_or(EngineNotInitializedError)
    }

    /// Returns true once an instance is installed.
    #[must_use]
    pub fn is_initialized() -> bool {
        INSTANCE.read().is_some()
    }

    /// Removes the process-wide instance. Runs holding it finish normally.
    pub fn teardown() -> bool {
        let removed = INSTANCE.write().take().is_some();
        if removed {
            info!("Pipelex torn down");
        }
        removed
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// The library.
    #[must_use]
    pub fn library(&self) -> &Library {
        self.engine.library()
    }

    /// The configuration it was made with.
    #[must_use]
    pub fn config(&self) -> &PipelexConfig {
        &self.config
    }
}

/// Runs `pipe_code` on the process-wide instance.
///
/// # Errors
///
/// Fails with [`EngineNotInitializedError`] before [`Pipelex::make`], and
/// otherwise as [`PipelineEngine::execute_pipeline`].
pub async fn execute_pipeline(
    pipe_code: &str,
    inputs: PipelineInputs,
) -> Result<Stuff, PipelexError> {
    let pipelex = Pipelex::get()?;
    pipelex.engine().execute_pipeline(pipe_code, inputs).await
}

/// Runs `pipe_code` on the process-wide instance, returning the full output.
///
/// # Errors
///
/// See [`execute_pipeline`].
pub async fn run_pipeline(
    pipe_code: &str,
    inputs: PipelineInputs,
    options: RunOptions,
) -> Result<PipeOutput, PipelexError> {
    let pipelex = Pipelex::get()?;
    pipelex.engine().run_pipeline(pipe_code, inputs, options).await
}
