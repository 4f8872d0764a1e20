//! Executor behaviour over hand-built graphs and recording steps.
mod common;

use common::{call_log, called_steps, FailingStep, RecordingStep};
use ontoflow::error::EngineError;
use ontoflow::runtime::{TraceStatus, WorkflowExecutor};
use ontoflow::steps::{ActionKind, StepRegistryBuilder};
use ontoflow::workflow::template::ParamExpr;
use ontoflow::workflow::{Edge, StepSpec, ValidatedGraph, WorkflowGraph};
use serde_json::json;
use std::sync::Arc;

fn record() -> ActionKind {
    ActionKind::Custom("record".to_string())
}

fn step(id: &str) -> StepSpec {
    StepSpec::action(id, id, record())
}

fn executor(builder: StepRegistryBuilder) -> WorkflowExecutor {
    WorkflowExecutor::new(Arc::new(builder.build()))
}

fn graph(steps: Vec<StepSpec>, edges: Vec<Edge>) -> ValidatedGraph {
    WorkflowGraph::new("test")
        .with_steps(steps)
        .with_edges(edges)
        .validate()
        .unwrap()
}

#[tokio::test]
async fn sequential_graph_runs_in_declared_order() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();

    let graph = WorkflowGraph::sequential("seq", vec![step("a"), step("b"), step("c")])
        .validate()
        .unwrap();
    let state = executor(builder).execute(&graph, json!({})).await.unwrap();

    assert_eq!(state.completed_steps(), vec!["a", "b", "c"]);
    assert_eq!(state.trace().len(), 3);
    assert!(state.trace().iter().all(|e| e.status == TraceStatus::Completed));
    assert_eq!(called_steps(&log), vec!["a", "b", "c"]);
    assert_eq!(state.current_step(), Some("c"));
    assert!(state.error().is_none());
}

#[tokio::test]
async fn guarded_fan_out_takes_only_the_matching_branch() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();
    for kind in [ActionKind::CreateEntity, ActionKind::UpdateEntity, ActionKind::FindEntities] {
        builder.register(kind, Arc::new(RecordingStep::new(&log))).unwrap();
    }

    let graph = graph(
        vec![
            step("route"),
            StepSpec::action("create-entity", "create", ActionKind::CreateEntity),
            StepSpec::action("update-entity", "update", ActionKind::UpdateEntity),
            StepSpec::action("find-entities", "find", ActionKind::FindEntities),
        ],
        vec![
            Edge::when("route", "create-entity", "inputs.operation == 'create'"),
            Edge::when("route", "update-entity", "inputs.operation == 'update'"),
            Edge::always("route", "find-entities"),
        ],
    );
    let executor = executor(builder);

    let state = executor
        .execute(&graph, json!({"operation": "create"}))
        .await
        .unwrap();
    assert_eq!(called_steps(&log), vec!["route", "create-entity"]);
    assert_eq!(state.completed_steps(), vec!["route", "create-entity"]);
    assert!(state.output("update-entity").is_none());

    log.lock().unwrap().clear();
    let state = executor
        .execute(&graph, json!({"operation": "list"}))
        .await
        .unwrap();
    assert_eq!(state.completed_steps(), vec!["route", "find-entities"]);
}

#[tokio::test]
async fn fan_in_waits_for_both_predecessors() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();
    builder
        .register(
            ActionKind::Custom("slow".to_string()),
            Arc::new(RecordingStep::new(&log).delayed(40)),
        )
        .unwrap();

    let graph = graph(
        vec![
            step("start"),
            StepSpec::action("slow", "slow", ActionKind::Custom("slow".to_string())),
            step("fast"),
            step("join")
                .with_param("slow", ParamExpr::step_output("slow", "status"))
                .with_param("fast", ParamExpr::step_output("fast", "status")),
        ],
        vec![
            Edge::always("start", "slow"),
            Edge::always("start", "fast"),
            Edge::always("slow", "join"),
            Edge::always("fast", "join"),
        ],
    );

    let state = executor(builder).execute(&graph, json!({})).await.unwrap();

    // Both branches were in flight together: the fast one finished first.
    assert_eq!(called_steps(&log), vec!["start", "fast", "slow", "join"]);
    assert_eq!(state.completed_steps(), vec!["start", "fast", "slow", "join"]);

    let join = log.lock().unwrap().last().cloned().unwrap();
    assert_eq!(join.params, json!({"slow": "completed", "fast": "completed"}));
}

#[tokio::test]
async fn failing_step_stops_traversal_and_keeps_partial_progress() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();
    builder
        .register(ActionKind::Custom("boom".to_string()), Arc::new(FailingStep("store offline")))
        .unwrap();

    let graph = WorkflowGraph::sequential(
        "fails",
        vec![
            step("a"),
            StepSpec::action("boom", "boom", ActionKind::Custom("boom".to_string())),
            step("c"),
        ],
    )
    .validate()
    .unwrap();

    let failure = executor(builder).execute(&graph, json!({})).await.unwrap_err();

    assert!(matches!(failure.error, EngineError::StepExecution(_)));
    assert!(failure.to_string().contains("store offline"));

    let trace = failure.state.trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].status, TraceStatus::Completed);
    assert_eq!(trace[1].step_id, "boom");
    assert_eq!(trace[1].status, TraceStatus::Failed);
    assert!(trace[1].error.as_deref().unwrap().contains("store offline"));
    assert!(trace.iter().all(|e| e.step_id != "c"));

    assert!(failure.state.error().unwrap().contains("store offline"));
    assert!(failure.state.output("a").is_some());
    assert_eq!(called_steps(&log), vec!["a"]);
}

#[tokio::test]
async fn on_failure_edge_runs_cleanup_but_run_still_fails() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();
    builder
        .register(ActionKind::Custom("boom".to_string()), Arc::new(FailingStep("nope")))
        .unwrap();

    let graph = graph(
        vec![
            step("a"),
            StepSpec::action("boom", "boom", ActionKind::Custom("boom".to_string())),
            step("next"),
            step("cleanup"),
        ],
        vec![
            Edge::always("a", "boom"),
            Edge::always("boom", "next"),
            Edge::on_failure("boom", "cleanup"),
        ],
    );

    let failure = executor(builder).execute(&graph, json!({})).await.unwrap_err();
    assert_eq!(called_steps(&log), vec!["a", "cleanup"]);
    assert_eq!(failure.state.completed_steps(), vec!["a", "cleanup"]);
    assert!(failure.state.output("next").is_none());
}

#[tokio::test]
async fn unregistered_action_is_rejected_before_any_step_runs() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();

    let graph = WorkflowGraph::sequential(
        "unknown",
        vec![step("a"), StepSpec::action("b", "b", ActionKind::Custom("missing".to_string()))],
    )
    .validate()
    .unwrap();

    let failure = executor(builder).execute(&graph, json!({})).await.unwrap_err();
    match &failure.error {
        EngineError::UnknownStep { step, action } => {
            assert_eq!(step, "b");
            assert_eq!(action, "missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(failure.state.trace().is_empty());
    assert!(called_steps(&log).is_empty());
}

#[tokio::test]
async fn no_matching_guard_without_default_is_a_routing_error() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();

    let graph = graph(
        vec![step("route"), step("x"), step("y")],
        vec![
            Edge::when("route", "x", "inputs.operation == 'create'"),
            Edge::when("route", "y", "inputs.operation == 'update'"),
        ],
    );

    let failure = executor(builder)
        .execute(&graph, json!({"operation": "delete"}))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, EngineError::Routing(_)));
    assert_eq!(failure.state.completed_steps(), vec!["route"]);
    assert_eq!(failure.state.trace().len(), 1);
    assert!(failure.state.error().unwrap().contains("route"));
    assert_eq!(called_steps(&log), vec!["route"]);
}

#[tokio::test]
async fn condition_step_output_drives_routing() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();

    let graph = graph(
        vec![
            StepSpec::condition("is-big", "large order?", json!("inputs.total > 100")),
            step("big"),
            step("small"),
        ],
        vec![
            Edge::when("is-big", "big", "is-big.output.met == true"),
            Edge::always("is-big", "small"),
        ],
    );
    let executor = executor(builder);

    let state = executor.execute(&graph, json!({"total": 500})).await.unwrap();
    assert_eq!(state.output("is-big").unwrap()["met"], true);
    assert_eq!(state.completed_steps(), vec!["is-big", "big"]);

    let state = executor.execute(&graph, json!({"total": 5})).await.unwrap();
    assert_eq!(state.output("is-big").unwrap()["met"], false);
    assert_eq!(state.completed_steps(), vec!["is-big", "small"]);
}

#[tokio::test]
async fn templates_resolve_against_inputs_and_earlier_outputs() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder
        .register(
            record(),
            Arc::new(RecordingStep::new(&log).returning(json!({"entityId": "c-7"}))),
        )
        .unwrap();

    let graph = WorkflowGraph::sequential(
        "templates",
        vec![
            step("first").with_param("name", ParamExpr::input("data.name")),
            step("second")
                .with_param("id", ParamExpr::step_output("first", "entityId"))
                .with_param("limit", ParamExpr::input("limit").or_default(10))
                .with_param(
                    "label",
                    ParamExpr::parse_value(json!("{{inputs.data.name}} ({{first.output.entityId}})"))
                        .unwrap(),
                ),
        ],
    )
    .validate()
    .unwrap();

    executor(builder)
        .execute(&graph, json!({"data": {"name": "Jane"}}))
        .await
        .unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0].params, json!({"name": "Jane"}));
    assert_eq!(calls[1].params, json!({"id": "c-7", "limit": 10, "label": "Jane (c-7)"}));
}

#[tokio::test]
async fn parallel_steps_carry_their_own_settle_times() {
    let log = call_log();
    let mut builder = StepRegistryBuilder::new();
    builder.register(record(), Arc::new(RecordingStep::new(&log))).unwrap();
    builder
        .register(
            ActionKind::Custom("slow".to_string()),
            Arc::new(RecordingStep::new(&log).delayed(120)),
        )
        .unwrap();

    let graph = graph(
        vec![
            step("start"),
            StepSpec::action("slow", "slow", ActionKind::Custom("slow".to_string())),
            step("fast"),
        ],
        vec![Edge::always("start", "slow"), Edge::always("start", "fast")],
    );

    let state = executor(builder).execute(&graph, json!({})).await.unwrap();
    assert_eq!(state.completed_steps(), vec!["start", "fast", "slow"]);

    let entry = |id: &str| state.trace().iter().find(|e| e.step_id == id).cloned().unwrap();
    let (fast, slow) = (entry("fast"), entry("slow"));
    let fast_took = fast.timestamp - fast.started_at;
    let slow_took = slow.timestamp - slow.started_at;

    assert!(slow_took >= chrono::Duration::milliseconds(100));
    assert!(fast_took < chrono::Duration::milliseconds(100));
    assert!(fast.timestamp < slow.timestamp);
    assert!(state.trace().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}
