// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides event recording, stub tools and definition builders

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use waypoint::engine::{
    EventKind, ExecutionContext, ExecutionError, ToolExecutor, WorkflowEngine, WorkflowEvent,
};
use waypoint::{Definition, Step};

/// Captures every event the engine publishes, in order.
#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl EventRecorder {
    pub fn attach(engine: &WorkflowEngine) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.on(Arc::new(move |event: &WorkflowEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        Self { events }
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    /// Kinds with progress noise stripped, for order assertions.
    pub fn lifecycle_kinds(&self) -> Vec<(EventKind, Option<String>)> {
        self.events()
            .into_iter()
            .filter(|e| {
                !matches!(e.kind, EventKind::StepBarUpdate)
            })
            .map(|e| (e.kind, e.step_id))
            .collect()
    }

    pub fn payloads_of(&self, kind: EventKind) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.payload)
            .collect()
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

/// Tool that returns a fixed value.
pub struct StaticTool {
    pub output: Value,
}

#[async_trait]
impl ToolExecutor for StaticTool {
    async fn execute(&self, _params: Value, _context: &ExecutionContext) -> Result<Value, ExecutionError> {
        Ok(self.output.clone())
    }
}

/// Tool that always fails.
pub struct FailingTool;

#[async_trait]
impl ToolExecutor for FailingTool {
    async fn execute(&self, _params: Value, _context: &ExecutionContext) -> Result<Value, ExecutionError> {
        Err(ExecutionError::StepExecution {
            step_id: String::new(),
            message: "deliberate failure".to_string(),
        })
    }
}

/// Tool that fails a fixed number of times before succeeding.
pub struct FlakyTool {
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
    pub output: Value,
}

impl FlakyTool {
    pub fn new(failures: u32, output: Value) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                failures,
                calls: Arc::clone(&calls),
                output,
            },
            calls,
        )
    }
}

#[async_trait]
impl ToolExecutor for FlakyTool {
    async fn execute(&self, _params: Value, _context: &ExecutionContext) -> Result<Value, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(ExecutionError::StepExecution {
                step_id: String::new(),
                message: format!("flaky failure {}", call),
            })
        } else {
            Ok(self.output.clone())
        }
    }
}

/// Tool that sleeps before returning, for pause/cancel timing tests.
pub struct SlowTool {
    pub delay: Duration,
    pub output: Value,
}

#[async_trait]
impl ToolExecutor for SlowTool {
    async fn execute(&self, _params: Value, _context: &ExecutionContext) -> Result<Value, ExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Linear chain of pass-through steps, each depending on the previous one.
pub fn linear_definition(id: &str, step_ids: &[&str]) -> Definition {
    let mut definition = Definition::new(id, format!("{} workflow", id));
    let mut previous: Option<&str> = None;
    for step_id in step_ids {
        let mut step = Step::new(*step_id, step_id.to_uppercase(), "task");
        if let Some(prev) = previous {
            step = step.with_dependencies(vec![prev.to_string()]);
        }
        definition = definition.with_step(step);
        previous = Some(*step_id);
    }
    definition
}

/// A -> {B, C} -> D diamond of pass-through steps.
pub fn diamond_definition(id: &str) -> Definition {
    Definition::new(id, format!("{} diamond", id))
        .with_step(Step::new("a", "A", "task"))
        .with_step(Step::new("b", "B", "task").with_dependencies(vec!["a".into()]))
        .with_step(Step::new("c", "C", "task").with_dependencies(vec!["a".into()]))
        .with_step(Step::new("d", "D", "task").with_dependencies(vec!["b".into(), "c".into()]))
}
