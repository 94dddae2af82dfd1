// ABOUTME: End-to-end engine tests covering scheduling, retries, skips and waits
// ABOUTME: Exercises the documented scenarios through the public engine API

mod common;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use common::{
    diamond_definition, linear_definition, EventRecorder, FailingTool, FlakyTool, SlowTool,
    StaticTool,
};
use waypoint::engine::{
    EventKind, ExecutionContext, ExecutionError, StepStatus, ToolMeta, UIComponentMeta,
    UIRenderResult, UIRenderer, WorkflowEngine,
};
use waypoint::{
    Definition, RetryPolicy, SkipPolicy, Step, ToolInvocation, UIConfig, UIMode, UIOption,
    WorkflowStatus,
};

struct NoopRenderer;

#[async_trait]
impl UIRenderer for NoopRenderer {
    async fn render(
        &self,
        _config: &UIConfig,
        _context: &ExecutionContext,
    ) -> Result<UIRenderResult, ExecutionError> {
        Ok(UIRenderResult {
            rendered: true,
            user_response: None,
            selected_option: None,
        })
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn step_status(engine: &WorkflowEngine, step_id: &str) -> StepStatus {
    engine
        .get_step_bar_state()
        .unwrap()
        .steps
        .into_iter()
        .find(|s| s.id == step_id)
        .unwrap()
        .status
}

// Scenario: linear chain of pass-through steps completes in order.
#[tokio::test]
async fn test_linear_success_event_order() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);

    engine
        .load_workflow(linear_definition("linear", &["a", "b", "c"]))
        .await
        .unwrap();
    let result = engine.start(None).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.context_snapshot.step_outputs.contains_key("a"));
    assert!(result.context_snapshot.step_outputs.contains_key("b"));
    assert!(result.context_snapshot.step_outputs.contains_key("c"));

    let sequence: Vec<(EventKind, Option<String>)> = recorder
        .lifecycle_kinds()
        .into_iter()
        .filter(|(kind, _)| {
            matches!(
                kind,
                EventKind::WorkflowStart
                    | EventKind::StepStart
                    | EventKind::StepComplete
                    | EventKind::ProgressUpdate
                    | EventKind::WorkflowComplete
            )
        })
        .collect();

    let expected: Vec<(EventKind, Option<String>)> = vec![
        (EventKind::WorkflowStart, None),
        (EventKind::StepStart, Some("a".into())),
        (EventKind::StepComplete, Some("a".into())),
        (EventKind::ProgressUpdate, Some("a".into())),
        (EventKind::StepStart, Some("b".into())),
        (EventKind::StepComplete, Some("b".into())),
        (EventKind::ProgressUpdate, Some("b".into())),
        (EventKind::StepStart, Some("c".into())),
        (EventKind::StepComplete, Some("c".into())),
        (EventKind::ProgressUpdate, Some("c".into())),
        (EventKind::WorkflowComplete, None),
    ];
    assert_eq!(sequence, expected);

    let percentages: Vec<u64> = recorder
        .payloads_of(EventKind::ProgressUpdate)
        .into_iter()
        .map(|p| p["percentage"].as_u64().unwrap())
        .collect();
    assert_eq!(percentages, vec![33, 67, 100]);
}

// Scenario: diamond where one branch fails; the join step never runs.
#[tokio::test]
async fn test_diamond_with_failure_blocks_join() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);
    engine
        .register_tool(ToolMeta::sync("explode", "Explode"), Arc::new(FailingTool))
        .unwrap();

    let mut definition = diamond_definition("diamond");
    definition.steps[1] = Step::new("b", "B", "tool")
        .with_dependencies(vec!["a".into()])
        .with_tool(ToolInvocation {
            tool_id: "explode".into(),
            params: None,
            output_key: None,
        });

    engine.load_workflow(definition).await.unwrap();
    let result = engine.start(None).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(step_status(&engine, "a"), StepStatus::Success);
    assert_eq!(step_status(&engine, "b"), StepStatus::Failed);
    assert_eq!(step_status(&engine, "c"), StepStatus::Success);
    assert_eq!(step_status(&engine, "d"), StepStatus::Pending);

    let failed = recorder.payloads_of(EventKind::WorkflowFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["failedStepId"], json!("b"));
}

// Scenario: retry with exponential backoff, failing twice then succeeding.
#[tokio::test]
async fn test_retry_with_backoff() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);

    let (tool, calls) = FlakyTool::new(2, json!("finally"));
    engine
        .register_tool(ToolMeta::sync("flaky", "Flaky"), Arc::new(tool))
        .unwrap();

    let definition = Definition::new("retry", "Retry").with_step(
        Step::new("s", "S", "tool")
            .with_retry_policy(RetryPolicy::exponential(2, Duration::from_millis(10), 2.0))
            .with_tool(ToolInvocation {
                tool_id: "flaky".into(),
                params: None,
                output_key: None,
            }),
    );
    engine.load_workflow(definition).await.unwrap();

    let started = Instant::now();
    let result = engine.start(None).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    // 10ms then 20ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(30));

    let retries = recorder.payloads_of(EventKind::StepRetry);
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0]["attempt"], json!(2));
    assert_eq!(retries[1]["attempt"], json!(3));

    let completes = recorder.payloads_of(EventKind::StepComplete);
    assert_eq!(completes.last().unwrap()["retryCount"], json!(2));
}

// Scenario: conditional branch where one path is skipped by expression.
#[tokio::test]
async fn test_conditional_branch_via_skip() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);
    engine
        .register_tool(
            ToolMeta::sync("pick", "Pick"),
            Arc::new(StaticTool {
                output: json!({"selectedOption": "fast"}),
            }),
        )
        .unwrap();

    let definition = Definition::new("branch", "Branch")
        .with_step(
            Step::new("choose", "Choose", "tool").with_tool(ToolInvocation {
                tool_id: "pick".into(),
                params: None,
                output_key: Some("choice".into()),
            }),
        )
        .with_step(
            Step::new("fast", "Fast path", "task")
                .with_dependencies(vec!["choose".into()])
                .with_skip_policy(SkipPolicy::expression(
                    "getGlobal('choice').selectedOption != 'fast'",
                )),
        )
        .with_step(
            Step::new("full", "Full path", "task")
                .with_dependencies(vec!["choose".into()])
                .with_skip_policy(SkipPolicy::expression(
                    "getGlobal('choice').selectedOption != 'full'",
                )),
        )
        .with_step(
            Step::new("finish", "Finish", "task")
                .with_dependencies(vec!["fast".into(), "full".into()]),
        );

    engine.load_workflow(definition).await.unwrap();
    let result = engine.start(None).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(step_status(&engine, "fast"), StepStatus::Success);
    assert_eq!(step_status(&engine, "full"), StepStatus::Skipped);
    assert_eq!(step_status(&engine, "finish"), StepStatus::Success);

    // The skipped branch committed a null output.
    assert_eq!(
        result.context_snapshot.step_outputs.get("full"),
        Some(&Value::Null)
    );
    assert_eq!(recorder.count_of(EventKind::StepSkip), 1);
}

// Scenario: async tool resolved externally while the workflow is running.
#[tokio::test]
async fn test_async_tool_roundtrip() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);
    engine
        .register_tool(
            ToolMeta::asynchronous("calc", "Calc").with_timeout(Duration::from_secs(5)),
            Arc::new(StaticTool { output: Value::Null }),
        )
        .unwrap();

    let definition = Definition::new("async", "Async").with_step(
        Step::new("s1", "S1", "tool").with_tool(ToolInvocation {
            tool_id: "calc".into(),
            params: Some(json!({"x": 1})),
            output_key: None,
        }),
    );
    engine.load_workflow(definition).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start(None).await });

    let invoke_seen = recorder.clone();
    assert!(
        wait_until(
            move || invoke_seen.count_of(EventKind::ToolInvoke) > 0,
            Duration::from_secs(2)
        )
        .await
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine
        .respond_to_tool("s1", "calc", json!({"y": 2}))
        .await
        .unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(
        result.context_snapshot.step_outputs.get("s1"),
        Some(&json!([{"toolId": "calc", "result": {"y": 2}}]))
    );

    let completes = recorder.payloads_of(EventKind::ToolComplete);
    assert_eq!(completes.len(), 1);
    assert!(completes[0]["duration"].as_u64().unwrap() >= 50);
}

// Scenario: select interaction answered externally.
#[tokio::test]
async fn test_ui_select_roundtrip() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);
    engine
        .register_ui_component(
            UIComponentMeta::new("picker", "Picker", vec![UIMode::Select]),
            Arc::new(NoopRenderer),
        )
        .unwrap();

    let definition = Definition::new("select", "Select").with_step(
        Step::new("s", "S", "ui").with_ui(UIConfig {
            component_id: "picker".into(),
            mode: UIMode::Select,
            data: Value::Null,
            timeout: None,
            options: vec![
                UIOption { id: "a".into(), label: "A".into(), value: None, next_step_id: None },
                UIOption { id: "b".into(), label: "B".into(), value: None, next_step_id: None },
            ],
        }),
    );
    engine.load_workflow(definition).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start(None).await });

    let render_seen = recorder.clone();
    assert!(
        wait_until(
            move || render_seen.count_of(EventKind::UIRender) > 0,
            Duration::from_secs(2)
        )
        .await
    );

    engine
        .respond_to_ui(
            "s",
            UIRenderResult {
                rendered: true,
                user_response: Some(json!("chosen")),
                selected_option: Some("b".into()),
            },
        )
        .await
        .unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);

    let output = result.context_snapshot.step_outputs.get("s").unwrap();
    assert_eq!(output["selectedOption"], json!("b"));
    assert!(recorder.count_of(EventKind::UIResponse) >= 1);
}

// Scenario: a select response outside the declared options fails the step.
#[tokio::test]
async fn test_ui_select_invalid_option_fails() {
    let engine = WorkflowEngine::new();
    engine
        .register_ui_component(
            UIComponentMeta::new("picker", "Picker", vec![UIMode::Select]),
            Arc::new(NoopRenderer),
        )
        .unwrap();

    let definition = Definition::new("select", "Select").with_step(
        Step::new("s", "S", "ui").with_ui(UIConfig {
            component_id: "picker".into(),
            mode: UIMode::Select,
            data: Value::Null,
            timeout: None,
            options: vec![UIOption {
                id: "a".into(),
                label: "A".into(),
                value: None,
                next_step_id: None,
            }],
        }),
    );
    engine.load_workflow(definition).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start(None).await });

    let waiter = engine.clone();
    assert!(
        wait_until(
            move || {
                waiter
                    .get_step_bar_state()
                    .map(|bar| bar.steps[0].status == StepStatus::WaitingInput)
                    .unwrap_or(false)
            },
            Duration::from_secs(2)
        )
        .await
    );

    let response = engine
        .respond_to_ui(
            "s",
            UIRenderResult {
                rendered: true,
                user_response: None,
                selected_option: Some("c".into()),
            },
        )
        .await;
    assert!(response.is_err());

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Failed);
    match result.error {
        Some(ExecutionError::StepExecution { message, .. }) => {
            assert!(message.contains("invalid option"));
        }
        other => panic!("expected step failure, got {:?}", other),
    }
}

// Pause stops new batches; in-flight steps run to completion.
#[tokio::test]
async fn test_pause_and_resume() {
    let engine = WorkflowEngine::new();
    engine
        .register_tool(
            ToolMeta::sync("slow", "Slow"),
            Arc::new(SlowTool {
                delay: Duration::from_millis(25),
                output: json!("done"),
            }),
        )
        .unwrap();

    let mut definition = Definition::new("pausable", "Pausable");
    for (id, deps) in [("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])] {
        definition = definition.with_step(
            Step::new(id, id.to_uppercase(), "tool")
                .with_dependencies(deps.into_iter().map(String::from).collect())
                .with_tool(ToolInvocation {
                    tool_id: "slow".into(),
                    params: None,
                    output_key: None,
                }),
        );
    }
    engine.load_workflow(definition).await.unwrap();

    // Pause as soon as the first step finishes.
    let pauser = engine.clone();
    engine.on_kind(
        EventKind::StepComplete,
        Arc::new(move |event| {
            if event.step_id.as_deref() == Some("a") {
                let _ = pauser.pause();
            }
        }),
    );

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start(None).await });

    let paused = engine.clone();
    assert!(
        wait_until(
            move || paused.get_status() == WorkflowStatus::Paused,
            Duration::from_secs(2)
        )
        .await
    );

    // The paused loop must not have dispatched b.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(step_status(&engine, "b"), StepStatus::Pending);

    engine.resume().unwrap();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
}

// Cancel rejects outstanding waits and fails the workflow exactly once.
#[tokio::test]
async fn test_cancel_while_waiting() {
    let engine = WorkflowEngine::new();
    let recorder = EventRecorder::attach(&engine);
    engine
        .register_tool(
            ToolMeta::asynchronous("external", "External"),
            Arc::new(StaticTool { output: Value::Null }),
        )
        .unwrap();

    let definition = Definition::new("cancellable", "Cancellable")
        .with_step(
            Step::new("a", "A", "tool").with_tool(ToolInvocation {
                tool_id: "external".into(),
                params: None,
                output_key: None,
            }),
        )
        .with_step(Step::new("b", "B", "task").with_dependencies(vec!["a".into()]));
    engine.load_workflow(definition).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start(None).await });

    let waiting = recorder.clone();
    assert!(
        wait_until(
            move || waiting.count_of(EventKind::WaitStart) > 0,
            Duration::from_secs(2)
        )
        .await
    );

    engine.cancel().await.unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(result.error.unwrap().is_cancellation());
    assert_eq!(step_status(&engine, "b"), StepStatus::Pending);

    let failures = recorder.payloads_of(EventKind::WorkflowFailed);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["error"], json!("workflow cancelled"));
}

// Independent steps run concurrently inside one batch.
#[tokio::test]
async fn test_parallel_branch_execution() {
    let engine = WorkflowEngine::new();
    engine
        .register_tool(
            ToolMeta::sync("slow", "Slow"),
            Arc::new(SlowTool {
                delay: Duration::from_millis(60),
                output: json!("done"),
            }),
        )
        .unwrap();

    let mut definition = Definition::new("parallel", "Parallel");
    for id in ["a", "b", "c", "d"] {
        definition = definition.with_step(
            Step::new(id, id.to_uppercase(), "tool").with_tool(ToolInvocation {
                tool_id: "slow".into(),
                params: None,
                output_key: None,
            }),
        );
    }
    engine.load_workflow(definition).await.unwrap();

    let started = Instant::now();
    let result = engine.start(None).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status, WorkflowStatus::Completed);
    // Four 60ms steps run as one batch, far under the serial 240ms.
    assert!(
        elapsed < Duration::from_millis(200),
        "batch took {:?}",
        elapsed
    );
}

// Two instances share nothing through their contexts.
#[tokio::test]
async fn test_instance_context_isolation() {
    let writer = WorkflowEngine::new();
    writer
        .register_tool(
            ToolMeta::sync("emit", "Emit"),
            Arc::new(StaticTool { output: json!("written") }),
        )
        .unwrap();
    let definition = Definition::new("iso", "Isolation").with_step(
        Step::new("w", "W", "tool").with_tool(ToolInvocation {
            tool_id: "emit".into(),
            params: None,
            output_key: Some("shared_key".into()),
        }),
    );
    writer.load_workflow(definition).await.unwrap();

    let observer = WorkflowEngine::new();
    observer
        .load_workflow(linear_definition("other", &["x"]))
        .await
        .unwrap();
    let before = observer.get_context().unwrap().snapshot().await;

    writer.start(None).await.unwrap();

    let after = observer.get_context().unwrap().snapshot().await;
    assert_eq!(before.globals.len(), after.globals.len());
    assert!(!after.globals.contains_key("shared_key"));
}

// Before-hooks mutate the input the body observes, globals first.
#[tokio::test]
async fn test_global_and_step_hook_order() {
    use waypoint::engine::{Hook, HookContext, HookPhase};

    struct TagHook {
        id: String,
        tag: String,
    }

    #[async_trait]
    impl Hook for TagHook {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, ctx: &mut HookContext) -> Result<(), ExecutionError> {
            let so_far = ctx.step_input.as_str().unwrap_or("").to_string();
            ctx.step_input = json!(format!("{}{}", so_far, self.tag));
            Ok(())
        }
    }

    let engine = WorkflowEngine::new();
    engine.add_global_hook(
        HookPhase::Before,
        Arc::new(TagHook { id: "global".into(), tag: "G".into() }),
    );

    let hooks = waypoint::HookSet::new().with_before(Arc::new(TagHook {
        id: "scoped".into(),
        tag: "S".into(),
    }));
    let definition = Definition::new("hooks", "Hooks")
        .with_step(Step::new("s", "S", "task").with_hooks(hooks));
    engine.load_workflow(definition).await.unwrap();

    let result = engine.start(None).await.unwrap();
    // Input starts null; hooks append onto the empty string in order.
    assert_eq!(
        result.context_snapshot.step_outputs.get("s"),
        Some(&json!("GS"))
    );
}
