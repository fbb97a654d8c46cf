//! End-to-end tests for pipeline execution.

use super::*;
use crate::cancellation::CancellationToken;
use crate::concepts::{Concept, FieldSpec};
use crate::config::{EngineConfig, ParallelFailurePolicy};
use crate::context::RunIdentity;
use crate::errors::{ErrorPhase, PipelexError};
use crate::events::CollectingEventSink;
use crate::handlers::{FnHandler, StepBindings, StepHandler};
use crate::library::Library;
use crate::pipes::{ParallelOutput, PipeDefinition, SubPipe};
use crate::testing::{
    assert_error_phase, assert_events_in_order, assert_lineage, assert_no_event,
    assert_text_stuff, composite_library, tagline_handler, tutor_inputs, tutor_library,
    EchoHandler, FailingHandler, MockHandler, SlowHandler, TAGLINE_CONCEPT, TUTOR_PIPE,
};
use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

mock! {
    pub Step {}

    #[async_trait]
    impl StepHandler for Step {
        async fn run(&self, bindings: &StepBindings) -> anyhow::Result<serde_json::Value>;
    }
}

fn tutor_engine(handler: Arc<dyn StepHandler>) -> (PipelineEngine, Arc<CollectingEventSink>) {
    let sink = Arc::new(CollectingEventSink::new());
    let engine = PipelineEngine::new(tutor_library(handler).unwrap()).with_event_sink(sink.clone());
    (engine, sink)
}

fn untouched_step() -> Arc<dyn StepHandler> {
    let mut step = MockStep::new();
    step.expect_run().times(0);
    Arc::new(step)
}

/// `fast` echoes immediately, `slow` waits; `race` runs both with the
/// `slow` branch designated as output.
fn race_library(fast: Arc<dyn StepHandler>, slow: Arc<dyn StepHandler>) -> Library {
    Library::builder()
        .handler("fast", fast)
        .unwrap()
        .handler("slow", slow)
        .unwrap()
        .pipe(PipeDefinition::atomic("fast", "fast", "Text").with_input("text", "Text"))
        .pipe(PipeDefinition::atomic("slow", "slow", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::parallel(
                "race",
                vec![SubPipe::new("fast"), SubPipe::new("slow")],
                ParallelOutput::Branch("slow".to_string()),
                "Text",
            )
            .with_input("text", "Text"),
        )
        .build()
        .unwrap()
}

fn text_inputs(text: &str) -> PipelineInputs {
    PipelineInputs::new().with_content("text", json!(text))
}

#[tokio::test]
async fn test_tutor_pipeline_produces_tagline() {
    let (engine, _) = tutor_engine(tagline_handler());

    let stuff = engine
        .execute_pipeline(TUTOR_PIPE, tutor_inputs("A patient Pipelex tutor"))
        .await
        .unwrap();

    assert_text_stuff(&stuff, TAGLINE_CONCEPT);
    assert!(stuff.as_str().unwrap().starts_with("A patient Pipelex tutor"));
}

#[tokio::test]
async fn test_tutor_pipeline_with_mock_step() {
    let mut step = MockStep::new();
    step.expect_run()
        .withf(|bindings| {
            bindings.pipe_code() == TUTOR_PIPE
                && bindings.require_str("description").ok() == Some("Tutor")
        })
        .times(1)
        .returning(|_| Ok(json!("Pipes, typed.")));
    let (engine, _) = tutor_engine(Arc::new(step));

    let stuff = engine
        .execute_pipeline(TUTOR_PIPE, tutor_inputs("Tutor"))
        .await
        .unwrap();
    assert_eq!(stuff.as_str().unwrap(), "Pipes, typed.");
}

#[tokio::test]
async fn test_missing_description_fails_before_step() {
    let (engine, sink) = tutor_engine(untouched_step());

    let err = engine
        .execute_pipeline(TUTOR_PIPE, PipelineInputs::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelexError::MissingInput(ref e) if e.input == "description"));
    assert!(err.to_string().contains("description"));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_invalid_content_fails_before_step() {
    let (engine, sink) = tutor_engine(untouched_step());

    let inputs = PipelineInputs::new().with_input("description", "Pipelex tutor", json!(42));
    let err = engine.execute_pipeline(TUTOR_PIPE, inputs).await.unwrap_err();

    assert!(matches!(err, PipelexError::ConceptValidation(ref e) if e.concept == "Pipelex tutor"));
    assert_error_phase(&err, ErrorPhase::Binding);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_unknown_pipe_has_no_side_effects() {
    let (engine, sink) = tutor_engine(untouched_step());

    let err = engine
        .execute_pipeline("nope", tutor_inputs("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelexError::UnknownPipeCode(ref e) if e.pipe_code == "nope"));
    assert!(sink.is_empty());
    assert!(engine.tracker().is_empty());
}

#[tokio::test]
async fn test_unexpected_input_rejected() {
    let (engine, _) = tutor_engine(untouched_step());
    let inputs = tutor_inputs("x").with_content("audience", json!("students"));

    let err = engine.execute_pipeline(TUTOR_PIPE, inputs).await.unwrap_err();
    assert!(matches!(err, PipelexError::UnexpectedInput(ref e) if e.input == "audience"));
}

#[tokio::test]
async fn test_output_mismatch_is_wrapped_with_lineage() {
    let (engine, _) = tutor_engine(Arc::new(MockHandler::new(json!(42))));

    let err = engine
        .execute_pipeline(TUTOR_PIPE, tutor_inputs("x"))
        .await
        .unwrap_err();

    assert_lineage(&err, &[TUTOR_PIPE]);
    assert!(matches!(err.root_cause(), PipelexError::OutputConceptMismatch(_)));
    assert_error_phase(&err, ErrorPhase::Execution);
}

#[tokio::test]
async fn test_events_for_successful_run() {
    let (engine, sink) = tutor_engine(tagline_handler());
    let request_id = Uuid::new_v4();

    let output = engine
        .run_pipeline(
            TUTOR_PIPE,
            tutor_inputs("Tutor"),
            RunOptions::new().with_request_id(request_id),
        )
        .await
        .unwrap();

    assert_events_in_order(
        &sink,
        &["pipeline.started", "pipe.started", "pipe.completed", "pipeline.completed"],
    );
    assert_no_event(&sink, "pipeline.failed");
    assert_eq!(sink.events_for_pipe(TUTOR_PIPE).len(), 2);

    let run_id = output.identity.pipeline_run_id.to_string();
    for (_, data) in sink.events() {
        let data = data.unwrap();
        assert_eq!(data["pipeline_run_id"], json!(run_id));
        assert_eq!(data["request_id"], json!(request_id.to_string()));
    }
    assert_eq!(output.identity.request_id, Some(request_id));
}

#[tokio::test]
async fn test_run_output_keeps_working_memory() {
    let engine = PipelineEngine::new(composite_library().unwrap());

    let output = engine
        .run_pipeline("shout_twice", text_inputs("hi"), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(output.main_stuff_as_str().unwrap(), "HI");
    assert_eq!(output.main_stuff().name(), Some("second"));
    assert_eq!(output.get("first").unwrap().as_str().unwrap(), "HI");
    assert_eq!(output.get("text").unwrap().as_str().unwrap(), "hi");
    assert!(engine.tracker().is_empty());
}

#[tokio::test]
async fn test_parallel_combined_output() {
    let engine = PipelineEngine::new(composite_library().unwrap());

    let stuff = engine
        .execute_pipeline("both_cases", text_inputs("MiXeD"))
        .await
        .unwrap();

    assert_eq!(stuff.concept(), "Cases");
    let fields = stuff.as_mapping().unwrap();
    assert_eq!(fields["upper"].as_str().unwrap(), "MIXED");
    assert_eq!(fields["lower"].as_str().unwrap(), "mixed");
    assert_eq!(stuff.to_json(), json!({"upper": "MIXED", "lower": "mixed"}));
}

#[tokio::test]
async fn test_batch_preserves_order() {
    let engine = PipelineEngine::new(composite_library().unwrap())
        .with_config(EngineConfig::default().with_batch_concurrency(2));

    let inputs = PipelineInputs::new().with_content("texts", json!(["a", "b", "c", "d"]));
    let stuff = engine.execute_pipeline("upper_all", inputs).await.unwrap();

    let items: Vec<&str> = stuff
        .as_list_of("Text")
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert_eq!(items, vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn test_batch_of_refined_items_reads_as_declared_list() {
    let headline = FnHandler::new(|b: &StepBindings| {
        Ok(json!(format!("# {}", b.require_str("text")?)))
    });
    let library = Library::builder()
        .concept(Concept::refining("Headline", "Text"))
        .unwrap()
        .handler("headline", Arc::new(headline))
        .unwrap()
        .pipe(PipeDefinition::atomic("headline", "headline", "Headline").with_input("text", "Text"))
        .pipe(
            PipeDefinition::batch("headlines", SubPipe::new("headline"), "texts", "text", "Text[]")
                .with_input("texts", "Text[]"),
        )
        .build()
        .unwrap();
    let engine = PipelineEngine::new(library);

    let inputs = PipelineInputs::new().with_content("texts", json!(["news", "sports"]));
    let stuff = engine.execute_pipeline("headlines", inputs).await.unwrap();

    assert_eq!(stuff.concept(), "native.Text");
    let items = stuff.as_list_of("Text").unwrap();
    assert_eq!(items[0].as_str().unwrap(), "# news");
    assert_eq!(items[1].as_str().unwrap(), "# sports");
    assert!(items.iter().all(|item| item.concept() == "Headline"));
}

#[tokio::test]
async fn test_batch_rejects_non_list_input() {
    let engine = PipelineEngine::new(composite_library().unwrap());
    let inputs = PipelineInputs::new().with_content("texts", json!("a"));

    let err = engine.execute_pipeline("upper_all", inputs).await.unwrap_err();
    assert!(matches!(err, PipelexError::ConceptValidation(_)));
}

#[tokio::test]
async fn test_step_failure_reports_lineage() {
    let library = Library::builder()
        .handler("echo", Arc::new(EchoHandler))
        .unwrap()
        .handler("fail", Arc::new(FailingHandler::new("model unavailable")))
        .unwrap()
        .pipe(PipeDefinition::atomic("echo", "echo", "Text").with_input("text", "Text"))
        .pipe(PipeDefinition::atomic("broken", "fail", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::sequence(
                "flow",
                vec![
                    SubPipe::new("echo"),
                    SubPipe::new("broken").with_input("text", "echo"),
                ],
                "Text",
            )
            .with_input("text", "Text"),
        )
        .build()
        .unwrap();
    let sink = Arc::new(CollectingEventSink::new());
    let engine = PipelineEngine::new(library).with_event_sink(sink.clone());

    let err = engine
        .execute_pipeline("flow", text_inputs("hi"))
        .await
        .unwrap_err();

    assert_lineage(&err, &["flow", "broken"]);
    let PipelexError::StepExecution(step) = err.root_cause() else {
        panic!("expected a step failure, got {err}");
    };
    assert_eq!(step.handler, "fail");
    assert!(step.source.to_string().contains("model unavailable"));
    assert!(err.to_string().contains("flow > broken"));

    assert_events_in_order(&sink, &["pipe.failed", "pipe.failed", "pipeline.failed"]);
    assert!(engine.tracker().is_empty());
}

#[tokio::test]
async fn test_atomic_step_sees_declared_inputs_only() {
    let recorder = Arc::new(MockHandler::new(json!("done")));
    let library = Library::builder()
        .handler("record", recorder.clone())
        .unwrap()
        .handler("echo", Arc::new(EchoHandler))
        .unwrap()
        .pipe(PipeDefinition::atomic("echo", "echo", "Text").with_input("text", "Text"))
        .pipe(PipeDefinition::atomic("record", "record", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::sequence(
                "flow",
                vec![
                    SubPipe::new("echo").with_result("copy"),
                    SubPipe::new("record").with_input("text", "copy"),
                ],
                "Text",
            )
            .with_input("text", "Text")
            .with_input("extra", "Text"),
        )
        .build()
        .unwrap();
    let engine = PipelineEngine::new(library);

    let inputs = text_inputs("hi").with_content("extra", json!("hidden"));
    engine.execute_pipeline("flow", inputs).await.unwrap();

    assert_eq!(recorder.recorded_inputs(), vec![json!({"text": "hi"})]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_branches_run_concurrently() {
    let left = Arc::new(SlowHandler::new(Duration::from_secs(1), json!("left")));
    let right = Arc::new(SlowHandler::new(Duration::from_secs(1), json!("right")));
    let engine = PipelineEngine::new(race_library(left, right.clone()));

    let started = tokio::time::Instant::now();
    let stuff = engine
        .execute_pipeline("race", text_inputs("go"))
        .await
        .unwrap();

    assert_eq!(stuff.as_str().unwrap(), "right");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(right.completed(), 1);
}

fn pair_library(left: Arc<dyn StepHandler>, right: Arc<dyn StepHandler>) -> Library {
    Library::builder()
        .concept(Concept::structured(
            "Pair",
            [
                ("left", FieldSpec::required("Text")),
                ("right", FieldSpec::required("Text")),
            ],
        ))
        .unwrap()
        .handler("left", left)
        .unwrap()
        .handler("right", right)
        .unwrap()
        .pipe(PipeDefinition::atomic("left", "left", "Text").with_input("text", "Text"))
        .pipe(PipeDefinition::atomic("right", "right", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::parallel(
                "pair",
                vec![SubPipe::new("left"), SubPipe::new("right")],
                ParallelOutput::Combined,
                "Pair",
            )
            .with_input("text", "Text"),
        )
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_parallel_combined_output_ignores_completion_order() {
    let run = |left_delay: u64, right_delay: u64| async move {
        let engine = PipelineEngine::new(pair_library(
            Arc::new(SlowHandler::new(Duration::from_secs(left_delay), json!("L"))),
            Arc::new(SlowHandler::new(Duration::from_secs(right_delay), json!("R"))),
        ));
        engine
            .execute_pipeline("pair", text_inputs("go"))
            .await
            .unwrap()
    };

    let left_first = run(1, 3).await;
    let right_first = run(3, 1).await;

    assert_eq!(left_first.to_json(), json!({"left": "L", "right": "R"}));
    assert_eq!(left_first.to_json(), right_first.to_json());
    assert_eq!(left_first.digest(), right_first.digest());
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failure_aborts_siblings() {
    let slow = Arc::new(SlowHandler::new(Duration::from_secs(10), json!("late")));
    let engine = PipelineEngine::new(race_library(
        Arc::new(FailingHandler::new("boom")),
        slow.clone(),
    ));

    let err = engine
        .execute_pipeline("race", text_inputs("go"))
        .await
        .unwrap_err();

    assert_lineage(&err, &["race", "fast"]);
    assert_eq!(slow.completed(), 0);
    assert!(engine.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failure_drains_siblings() {
    let slow = Arc::new(SlowHandler::new(Duration::from_secs(10), json!("late")));
    let engine = PipelineEngine::new(race_library(
        Arc::new(FailingHandler::new("boom")),
        slow.clone(),
    ))
    .with_config(
        EngineConfig::default().with_parallel_failure(ParallelFailurePolicy::DrainSiblings),
    );

    let err = engine
        .execute_pipeline("race", text_inputs("go"))
        .await
        .unwrap_err();

    assert_lineage(&err, &["race", "fast"]);
    assert_eq!(slow.completed(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (engine, _) = tutor_engine(untouched_step());
    let token = Arc::new(CancellationToken::new());
    token.cancel("shutting down");

    let err = engine
        .run_pipeline(
            TUTOR_PIPE,
            tutor_inputs("x"),
            RunOptions::new().with_cancel_token(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), PipelexError::Cancelled(reason) if reason == "shutting down"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_running_step() {
    let slow = Arc::new(SlowHandler::new(Duration::from_secs(60), json!("late")));
    let (engine, _) = tutor_engine(slow.clone());
    let token = Arc::new(CancellationToken::new());

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel("user abort");
    });

    let err = engine
        .run_pipeline(
            TUTOR_PIPE,
            tutor_inputs("x"),
            RunOptions::new().with_cancel_token(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), PipelexError::Cancelled(reason) if reason == "user abort"));
    assert_eq!(slow.completed(), 0);
    assert!(engine.tracker().is_empty());
}

#[tokio::test]
async fn test_max_depth_exceeded() {
    let engine = PipelineEngine::new(composite_library().unwrap())
        .with_config(EngineConfig::default().with_max_depth(1));

    let err = engine
        .execute_pipeline("shout_twice", text_inputs("hi"))
        .await
        .unwrap_err();

    assert_lineage(&err, &["shout_twice", "upper"]);
    assert!(matches!(
        err.root_cause(),
        PipelexError::MaxDepthExceeded { max_depth: 1, .. }
    ));
}

#[tokio::test]
async fn test_refined_input_accepted_by_sub_pipe() {
    let library = Library::builder()
        .concept(Concept::refining("Headline", "Text"))
        .unwrap()
        .handler("echo", Arc::new(EchoHandler))
        .unwrap()
        .pipe(PipeDefinition::atomic("echo", "echo", "Text").with_input("text", "Text"))
        .pipe(
            PipeDefinition::sequence("wrap", vec![SubPipe::new("echo")], "Text")
                .with_input("text", "Headline"),
        )
        .build()
        .unwrap();
    let engine = PipelineEngine::new(library);

    let inputs = PipelineInputs::new().with_input("text", "Headline", json!("Big news"));
    let stuff = engine.execute_pipeline("wrap", inputs).await.unwrap();
    assert_eq!(stuff.as_str().unwrap(), "Big news");
    assert_eq!(stuff.concept(), "native.Text");
}

#[tokio::test]
async fn test_explicit_identity_is_used() {
    let (engine, _) = tutor_engine(tagline_handler());
    let identity = RunIdentity::new();

    let output = engine
        .run_pipeline(
            TUTOR_PIPE,
            tutor_inputs("Tutor"),
            RunOptions::new().with_identity(identity),
        )
        .await
        .unwrap();

    assert_eq!(output.identity, identity);
    assert_eq!(
        output.main_stuff().provenance().run_id,
        Some(identity.pipeline_run_id)
    );
}
