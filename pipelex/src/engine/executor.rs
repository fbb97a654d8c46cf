//! The pipeline execution engine.

use super::binding::{bind_call, bind_pipeline_inputs, PipelineInputs};
use super::output::PipeOutput;
use super::tracker::RunTracker;
use crate::cancellation::CancellationToken;
use crate::concepts::ConceptRequirement;
use crate::config::{EngineConfig, ParallelFailurePolicy};
use crate::context::{PipeRunContext, RunIdentity, RunState, WorkingMemory};
use crate::errors::{
    InputConceptMismatchError, MissingInputError, OutputConceptMismatchError, PipeRunError,
    PipelexError, StepExecutionError, UnknownConceptError, UnknownStepHandlerError,
};
use crate::events::{get_event_sink, EventSink};
use crate::handlers::StepBindings;
use crate::library::Library;
use crate::observability::{PipeSpanAttributes, PipelineSpanAttributes, SpanTimer};
use crate::pipes::{ParallelOutput, PipeDefinition, PipeKind, SubPipe};
use crate::stuff::{Provenance, Stuff, StuffContent};
use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, StreamExt, TryStreamExt};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    identity: Option<RunIdentity>,
    cancel_token: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Default options: fresh identity, fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs under a specific identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attaches a request id to a fresh identity.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        let identity = self.identity.unwrap_or_default();
        self.identity = Some(identity.with_request_id(request_id));
        self
    }

    /// Uses `token` to cancel the run from outside.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Output of one pipe invocation before its context is dropped.
struct Invocation {
    output: Stuff,
    memory: WorkingMemory,
}

/// Executes pipes of a frozen [`Library`].
///
/// Cloning is cheap; clones share the library and the run tracker.
#[derive(Clone)]
pub struct PipelineEngine {
    library: Library,
    config: EngineConfig,
    event_sink: Option<Arc<dyn EventSink>>,
    tracker: Arc<RunTracker>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("pipes", &self.library.pipes().len())
            .field("config", &self.config)
            .field("active_invocations", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new(library: Library) -> Self {
        Self {
            library,
            config: EngineConfig::default(),
            event_sink: None,
            tracker: Arc::new(RunTracker::new()),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Emits events to `sink` instead of the process-wide default.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// The library this engine executes.
    #[must_use]
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tracker of in-flight pipe invocations.
    #[must_use]
    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    fn event_sink(&self) -> Arc<dyn EventSink> {
        self.event_sink.clone().unwrap_or_else(get_event_sink)
    }

    /// Runs `pipe_code` and returns its output Stuff.
    ///
    /// # Errors
    ///
    /// Resolution and binding errors are returned as-is; failures after
    /// binding are wrapped in [`PipeRunError`].
    pub async fn execute_pipeline(
        &self,
        pipe_code: &str,
        inputs: PipelineInputs,
    ) -> Result<Stuff, PipelexError> {
        self.run_pipeline(pipe_code, inputs, RunOptions::default())
            .await
            .map(PipeOutput::into_main_stuff)
    }

    /// Runs `pipe_code` and returns the full [`PipeOutput`].
    ///
    /// # Errors
    ///
    /// See [`execute_pipeline`](Self::execute_pipeline).
    pub async fn run_pipeline(
        &self,
        pipe_code: &str,
        inputs: PipelineInputs,
        options: RunOptions,
    ) -> Result<PipeOutput, PipelexError> {
        let pipe = self.library.pipes().resolve(pipe_code)?;
        let identity = options.identity.unwrap_or_default();
        let bound = bind_pipeline_inputs(
            &pipe,
            &inputs,
            self.library.concepts(),
            &Provenance::input(identity.pipeline_run_id),
        )?;

        let token = options
            .cancel_token
            .unwrap_or_else(|| Arc::new(CancellationToken::new()));
        let run = Arc::new(RunState::new(identity, self.event_sink(), token));

        let mut attributes = PipelineSpanAttributes::new()
            .with_pipe_code(pipe_code)
            .with_pipeline_run_id(identity.pipeline_run_id.to_string())
            .with_input_count(bound.len());
        if let Some(request_id) = identity.request_id {
            attributes = attributes.with_request_id(request_id.to_string());
        }
        run.try_emit_event(
            "pipeline.started",
            Some(serde_json::json!(attributes.to_otel_attributes())),
        );
        info!(pipe_code, run_id = %identity.pipeline_run_id, "Pipeline started");

        let timer = SpanTimer::start(pipe_code);
        let span = tracing::info_span!("pipeline", pipe_code, run_id = %identity.pipeline_run_id);
        let ctx = PipeRunContext::root(
            Arc::clone(&run),
            pipe_code,
            WorkingMemory::from_entries(bound),
        );

        match self.run_pipe(pipe, ctx).instrument(span).await {
            Ok(invocation) => {
                let duration_ms = timer.finish();
                run.try_emit_event(
                    "pipeline.completed",
                    Some(serde_json::json!({
                        "pipe_code": pipe_code,
                        "duration_ms": duration_ms,
                        "output_concept": invocation.output.concept(),
                    })),
                );
                info!(pipe_code, duration_ms, "Pipeline completed");
                Ok(PipeOutput {
                    pipe_code: pipe_code.to_string(),
                    identity,
                    main_stuff: invocation.output,
                    working_memory: invocation.memory,
                    started_at: run.started_at(),
                    duration_ms,
                })
            }
            Err(err) => {
                let duration_ms = timer.finish();
                run.try_emit_event(
                    "pipeline.failed",
                    Some(serde_json::json!({
                        "pipe_code": pipe_code,
                        "duration_ms": duration_ms,
                        "error": err.to_string(),
                        "lineage": err.lineage(),
                    })),
                );
                warn!(pipe_code, error = %err, "Pipeline failed");
                Err(err)
            }
        }
    }

    fn run_pipe<'a>(
        &'a self,
        pipe: Arc<PipeDefinition>,
        ctx: PipeRunContext,
    ) -> BoxFuture<'a, Result<Invocation, PipelexError>> {
        let span = tracing::info_span!(
            "pipe",
            pipe_code = %pipe.code,
            kind = pipe.kind_name(),
            depth = ctx.depth(),
            run_id = %ctx.run_id(),
        );
        async move {
            let lineage = ctx.lineage().to_vec();
            self.invoke(&pipe, ctx).await.map_err(|err| match err {
                PipelexError::PipeRun(_) => err,
                other => PipeRunError::new(lineage, other).into(),
            })
        }
        .instrument(span)
        .boxed()
    }

    async fn invoke(
        &self,
        pipe: &PipeDefinition,
        mut ctx: PipeRunContext,
    ) -> Result<Invocation, PipelexError> {
        if ctx.depth() > self.config.max_depth as usize {
            return Err(PipelexError::MaxDepthExceeded {
                pipe_code: pipe.code.clone(),
                max_depth: self.config.max_depth,
            });
        }
        if ctx.is_cancelled() {
            return Err(PipelexError::Cancelled(
                ctx.cancel_token().reason().unwrap_or_default(),
            ));
        }

        let guard = self.tracker.track(
            ctx.run_id(),
            ctx.parent_invocation_id(),
            &pipe.code,
            ctx.depth(),
        );
        ctx.set_invocation_id(guard.invocation_id());

        let attributes = PipeSpanAttributes::new(&pipe.code)
            .with_kind(pipe.kind_name())
            .with_depth(ctx.depth());
        ctx.try_emit_event("pipe.started", Some(attributes.to_event_data()));
        debug!("Pipe started");

        let timer = SpanTimer::start(&pipe.code);
        let result = match &pipe.kind {
            PipeKind::Atomic { handler } => self.run_atomic(pipe, handler, &ctx).await,
            PipeKind::Sequence { steps } => self.run_sequence(pipe, steps, &mut ctx).await,
            PipeKind::Parallel {
                branches,
                output_from,
            } => {
                self.run_parallel(pipe, branches, output_from, &mut ctx)
                    .await
            }
            PipeKind::Batch {
                branch,
                input_list,
                input_item,
            } => {
                self.run_batch(pipe, branch, input_list, input_item, &ctx)
                    .await
            }
        };
        let duration_ms = timer.finish();

        match result {
            Ok(output) => {
                ctx.try_emit_event(
                    "pipe.completed",
                    Some(
                        attributes
                            .with_status("completed")
                            .with_duration_ms(duration_ms)
                            .with_output_concept(output.concept())
                            .to_event_data(),
                    ),
                );
                debug!(duration_ms, "Pipe completed");
                Ok(Invocation {
                    output,
                    memory: ctx.into_memory(),
                })
            }
            Err(err) => {
                ctx.try_emit_event(
                    "pipe.failed",
                    Some(
                        attributes
                            .with_status("failed")
                            .with_duration_ms(duration_ms)
                            .with_error(err.to_string())
                            .to_event_data(),
                    ),
                );
                debug!(duration_ms, error = %err, "Pipe failed");
                Err(err)
            }
        }
    }

    async fn run_atomic(
        &self,
        pipe: &PipeDefinition,
        handler_tag: &str,
        ctx: &PipeRunContext,
    ) -> Result<Stuff, PipelexError> {
        let handler = self
            .library
            .pipes()
            .step_handler(&pipe.code)
            .ok_or_else(|| UnknownStepHandlerError {
                pipe_code: pipe.code.clone(),
                handler: handler_tag.to_string(),
            })?;

        let mut inputs = BTreeMap::new();
        for name in pipe.inputs.keys() {
            let stuff = ctx
                .memory()
                .get(name)
                .ok_or_else(|| MissingInputError::new(&pipe.code, name))?;
            inputs.insert(name.clone(), stuff.clone());
        }
        let token = Arc::clone(ctx.cancel_token());
        let bindings = StepBindings::new(&pipe.code, inputs, ctx.run_id(), Arc::clone(&token));

        let raw = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(PipelexError::Cancelled(token.reason().unwrap_or_default()));
            }
            result = handler.run(&bindings) => {
                result.map_err(|e| StepExecutionError::new(&pipe.code, handler_tag, e))?
            }
        };

        let provenance = Provenance::pipe(&pipe.code, ctx.run_id());
        self.library
            .concepts()
            .build_stuff(&raw, &pipe.output, &provenance)
            .map_err(|err| match err {
                PipelexError::ConceptValidation(e) => OutputConceptMismatchError {
                    pipe_code: pipe.code.clone(),
                    expected: pipe.output.to_string(),
                    actual: format!("content invalid at {}: {}", e.path, e.reason),
                }
                .into(),
                other => other,
            })
    }

    async fn run_sequence(
        &self,
        pipe: &PipeDefinition,
        steps: &[SubPipe],
        ctx: &mut PipeRunContext,
    ) -> Result<Stuff, PipelexError> {
        let mut last = None;
        for step in steps {
            let callee = self.library.pipes().resolve(&step.pipe_code)?;
            let inputs = bind_call(&callee, step, ctx.memory(), None, self.library.concepts())?;
            let child = ctx.child(
                &callee.code,
                WorkingMemory::child_of(ctx.memory().snapshot(), inputs),
            );

            // The child memory drops here, so the next add writes in place.
            let output = self.run_pipe(callee, child).await?.output;
            let result = output.with_name(step.result_name());
            ctx.memory_mut().add(step.result_name(), result.clone())?;
            last = Some(result);
        }

        let output = last.ok_or_else(|| OutputConceptMismatchError {
            pipe_code: pipe.code.clone(),
            expected: pipe.output.to_string(),
            actual: "no output".to_string(),
        })?;
        self.check_output(pipe, &output)?;
        Ok(output)
    }

    async fn run_parallel(
        &self,
        pipe: &PipeDefinition,
        branches: &[SubPipe],
        output_from: &ParallelOutput,
        ctx: &mut PipeRunContext,
    ) -> Result<Stuff, PipelexError> {
        let snapshot = ctx.memory().snapshot();
        let mut in_flight = FuturesUnordered::new();
        for branch in branches {
            let callee = self.library.pipes().resolve(&branch.pipe_code)?;
            let inputs = bind_call(&callee, branch, &snapshot, None, self.library.concepts())?;
            let child = ctx.child(
                &callee.code,
                WorkingMemory::child_of(Arc::clone(&snapshot), inputs),
            );
            let name = branch.result_name().to_string();
            in_flight.push(self.run_pipe(callee, child).map(move |result| (name, result)));
        }

        let mut results = BTreeMap::new();
        let mut first_error = None;
        while let Some((name, result)) = in_flight.next().await {
            match result {
                Ok(invocation) => {
                    results.insert(name, invocation.output);
                }
                Err(err) => match self.config.parallel_failure {
                    ParallelFailurePolicy::AbortSiblings => {
                        debug!(pending = in_flight.len(), "Dropping in-flight branches");
                        return Err(err);
                    }
                    ParallelFailurePolicy::DrainSiblings => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                },
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        for (name, stuff) in &results {
            ctx.memory_mut().add(name.clone(), stuff.clone())?;
        }

        match output_from {
            ParallelOutput::Branch(name) => {
                let output = ctx
                    .memory()
                    .frame()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| OutputConceptMismatchError {
                        pipe_code: pipe.code.clone(),
                        expected: pipe.output.to_string(),
                        actual: format!("no branch result named '{name}'"),
                    })?;
                self.check_output(pipe, &output)?;
                Ok(output)
            }
            ParallelOutput::Combined => {
                let provenance = Provenance::pipe(&pipe.code, ctx.run_id());
                self.combine(pipe, results, &provenance)
            }
        }
    }

    async fn run_batch(
        &self,
        pipe: &PipeDefinition,
        branch: &SubPipe,
        input_list: &str,
        input_item: &str,
        ctx: &PipeRunContext,
    ) -> Result<Stuff, PipelexError> {
        let concepts = self.library.concepts();
        let list = ctx
            .memory()
            .get(input_list)
            .ok_or_else(|| MissingInputError::new(&pipe.code, input_list))?;
        let StuffContent::List(items) = list.content() else {
            return Err(InputConceptMismatchError {
                pipe_code: pipe.code.clone(),
                input: input_list.to_string(),
                expected: ConceptRequirement::list(list.concept()).to_string(),
                actual: list.requirement().to_string(),
            }
            .into());
        };

        let callee = self.library.pipes().resolve(&branch.pipe_code)?;
        let snapshot = ctx.memory().snapshot();
        let concurrency = self.config.batch_concurrency.max(1);
        debug!(items = items.len(), concurrency, "Batch started");

        let outputs: Vec<Stuff> = stream::iter(items.iter().cloned())
            .map(move |item| {
                let callee = Arc::clone(&callee);
                let snapshot = Arc::clone(&snapshot);
                async move {
                    let inputs =
                        bind_call(&callee, branch, &snapshot, Some((input_item, &item)), concepts)?;
                    let child = ctx.child(&callee.code, WorkingMemory::child_of(snapshot, inputs));
                    let invocation = self.run_pipe(callee, child).await?;
                    Ok::<_, PipelexError>(invocation.output)
                }
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        let item_requirement = ConceptRequirement::single(pipe.output.concept.clone());
        if let Some(bad) = outputs
            .iter()
            .find(|o| !concepts.is_requirement_compatible(&o.requirement(), &item_requirement))
        {
            return Err(OutputConceptMismatchError {
                pipe_code: pipe.code.clone(),
                expected: pipe.output.to_string(),
                actual: format!("an item of concept '{}'", bad.requirement()),
            }
            .into());
        }

        let concept = concepts
            .canonical_name(&pipe.output.concept)
            .ok_or_else(|| UnknownConceptError::new(&pipe.output.concept))?;
        Ok(Stuff::new(concept, StuffContent::List(outputs))
            .with_provenance(Provenance::pipe(&pipe.code, ctx.run_id())))
    }

    /// Builds the aggregate output of a parallel pipe from its branch results.
    fn combine(
        &self,
        pipe: &PipeDefinition,
        results: BTreeMap<String, Stuff>,
        provenance: &Provenance,
    ) -> Result<Stuff, PipelexError> {
        let concepts = self.library.concepts();
        let concept = concepts
            .canonical_name(&pipe.output.concept)
            .ok_or_else(|| UnknownConceptError::new(&pipe.output.concept))?;
        let combined =
            Stuff::new(concept, StuffContent::Structured(results)).with_provenance(provenance.clone());

        if pipe.output.is_list() || !concepts.validate(&combined.to_json(), concept) {
            return Err(OutputConceptMismatchError {
                pipe_code: pipe.code.clone(),
                expected: pipe.output.to_string(),
                actual: format!(
                    "combined fields [{}]",
                    combined
                        .as_mapping()
                        .map(|m| m.keys().cloned().collect::<Vec<_>>().join(", "))
                        .unwrap_or_default()
                ),
            }
            .into());
        }
        Ok(combined)
    }

    fn check_output(
        &self,
        pipe: &PipeDefinition,
        output: &Stuff,
    ) -> Result<(), OutputConceptMismatchError> {
        let actual = output.requirement();
        if self
            .library
            .concepts()
            .is_requirement_compatible(&actual, &pipe.output)
        {
            Ok(())
        } else {
            Err(OutputConceptMismatchError {
                pipe_code: pipe.code.clone(),
                expected: pipe.output.to_string(),
                actual: format!("'{actual}'"),
            })
        }
    }
}
