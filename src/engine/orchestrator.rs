// ABOUTME: Workflow engine orchestrator: load, start, pause, resume, cancel
// ABOUTME: Drives the DAG main loop and fans ready steps out to the executor

use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{RwLock as TokioRwLock, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::dag::Dag;
use super::error::{ExecutionError, HookPhase, Result};
use super::events::{EventBus, EventHandler, EventKind, WorkflowEvent};
use super::executor::{CancelFlag, StepBody, StepExecutor};
use super::hooks::{Hook, HookManager};
use super::progress::{ProgressTracker, StepBarState};
use super::result::{
    SharedStepStates, StepResult, StepRuntimeState, StepStatus, WorkflowResult, WorkflowStatus,
};
use super::tools::{ToolExecutor, ToolInvoker, ToolMeta, ToolRegistry};
use super::ui::{
    UIComponentMeta, UIInteractionHandler, UIRegistry, UIRenderResult, UIRenderer,
    DEFAULT_DISPLAY_TIMEOUT,
};
use super::wait::WaitManager;
use crate::definition::{Definition, DefinitionValidator, Step, ValidationReport};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on steps executing at the same time.
    pub max_concurrent_steps: usize,
    /// Sleep quantum of the main loop while paused or idle-waiting.
    pub poll_interval: Duration,
    /// Auto-advance timeout for display-only interactions.
    pub default_ui_timeout: Duration,
    /// Fallback timeout applied to tools that declare none.
    pub default_tool_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 8,
            poll_interval: Duration::from_millis(25),
            default_ui_timeout: DEFAULT_DISPLAY_TIMEOUT,
            default_tool_timeout: None,
        }
    }
}

/// Metadata-only catalog of step types, used by external editors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTypeMeta {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub struct StepTypeRegistry {
    types: StdRwLock<IndexMap<String, StepTypeMeta>>,
}

impl StepTypeRegistry {
    pub fn new() -> Self {
        let registry = Self {
            types: StdRwLock::new(IndexMap::new()),
        };
        for (id, name, description) in [
            ("task", "Task", "Pass-through or computed step"),
            ("ui", "User Interaction", "Step resolved by a UI component"),
            ("tool", "Tool Invocation", "Step that runs registered tools"),
        ] {
            registry.register(StepTypeMeta {
                id: id.to_string(),
                name: name.to_string(),
                description: Some(description.to_string()),
            });
        }
        registry
    }

    pub fn register(&self, meta: StepTypeMeta) {
        let mut types = self.types.write().expect("step type registry poisoned");
        types.entry(meta.id.clone()).or_insert(meta);
    }

    pub fn get_all(&self) -> Vec<StepTypeMeta> {
        let types = self.types.read().expect("step type registry poisoned");
        types.values().cloned().collect()
    }
}

impl Default for StepTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time execution statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub running_steps: usize,
    pub waiting_steps: usize,
    pub max_concurrent_steps: usize,
    pub available_slots: usize,
}

#[derive(Clone)]
struct Instance {
    definition: Arc<Definition>,
    dag: Arc<Dag>,
    instance_id: String,
    context: ExecutionContext,
    step_states: SharedStepStates,
    wait_manager: WaitManager,
    tool_invoker: ToolInvoker,
    ui_handler: UIInteractionHandler,
    executor: Arc<StepExecutor>,
    progress: ProgressTracker,
    cancel_flags: Arc<TokioRwLock<HashMap<String, CancelFlag>>>,
    completed: Arc<TokioRwLock<HashSet<String>>>,
    failed: Arc<TokioRwLock<HashSet<String>>>,
    failed_step: Arc<TokioRwLock<Option<String>>>,
    cancelled: Arc<AtomicBool>,
}

/// The engine facade: owns the registries, the event bus and at most one
/// loaded workflow instance at a time. Clones share all state, which lets
/// callers respond to waits from other tasks while `start` is running.
#[derive(Clone)]
pub struct WorkflowEngine {
    config: EngineConfig,
    events: EventBus,
    tool_registry: Arc<ToolRegistry>,
    ui_registry: Arc<UIRegistry>,
    step_types: Arc<StepTypeRegistry>,
    hook_manager: Arc<HookManager>,
    semaphore: Arc<Semaphore>,
    status: Arc<StdRwLock<WorkflowStatus>>,
    instance: Arc<StdRwLock<Option<Instance>>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_steps));
        Self {
            config,
            events: EventBus::new(),
            tool_registry: Arc::new(ToolRegistry::new()),
            ui_registry: Arc::new(UIRegistry::new()),
            step_types: Arc::new(StepTypeRegistry::new()),
            hook_manager: Arc::new(HookManager::new()),
            semaphore,
            status: Arc::new(StdRwLock::new(WorkflowStatus::Idle)),
            instance: Arc::new(StdRwLock::new(None)),
        }
    }

    fn set_status(&self, status: WorkflowStatus) {
        let mut current = self.status.write().expect("engine status poisoned");
        *current = status;
    }

    pub fn get_status(&self) -> WorkflowStatus {
        *self.status.read().expect("engine status poisoned")
    }

    fn current_instance(&self) -> Result<Instance> {
        let instance = self.instance.read().expect("engine instance poisoned");
        instance.clone().ok_or_else(|| ExecutionError::InvalidState {
            message: "no workflow loaded".to_string(),
        })
    }

    /// Validate a definition, build its DAG and set up a fresh instance.
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id))]
    pub async fn load_workflow(&self, definition: Definition) -> Result<()> {
        if matches!(self.get_status(), WorkflowStatus::Running | WorkflowStatus::Paused) {
            return Err(ExecutionError::InvalidState {
                message: "cannot load while a workflow is running".to_string(),
            });
        }

        definition
            .validate_structure()
            .map_err(|e| ExecutionError::Validation {
                issues: vec![e.to_string()],
            })?;

        let dag = Dag::build(&definition)?;
        if let Some(cycle) = dag.detect_cycle() {
            return Err(ExecutionError::CyclicDependency { cycle });
        }

        let instance_id = Uuid::new_v4().to_string();
        let workflow_id = definition.id.clone();
        let context = ExecutionContext::new(workflow_id.clone(), instance_id.clone());

        let step_states: SharedStepStates = Arc::new(TokioRwLock::new(
            definition
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepRuntimeState::new(s.id.clone())))
                .collect(),
        ));

        let wait_manager = WaitManager::new(
            workflow_id.clone(),
            instance_id.clone(),
            self.events.clone(),
            Arc::clone(&step_states),
        );
        let tool_invoker = ToolInvoker::new(
            workflow_id.clone(),
            instance_id.clone(),
            Arc::clone(&self.tool_registry),
            self.events.clone(),
            wait_manager.clone(),
            self.config.default_tool_timeout,
        );
        let ui_handler = UIInteractionHandler::new(
            workflow_id.clone(),
            instance_id.clone(),
            Arc::clone(&self.ui_registry),
            self.events.clone(),
            wait_manager.clone(),
            self.config.default_ui_timeout,
        );
        let executor = Arc::new(StepExecutor::new(
            workflow_id.clone(),
            instance_id.clone(),
            self.events.clone(),
            Arc::clone(&self.hook_manager),
        ));
        let progress = ProgressTracker::new(
            workflow_id,
            instance_id.clone(),
            self.events.clone(),
            &definition.steps,
        );

        if let Some(ref hooks) = definition.global_hooks {
            for hook in &hooks.before {
                self.hook_manager.add_global_hook(HookPhase::Before, Arc::clone(hook));
            }
            for hook in &hooks.after {
                self.hook_manager.add_global_hook(HookPhase::After, Arc::clone(hook));
            }
        }

        let cancel_flags = definition
            .steps
            .iter()
            .map(|s| (s.id.clone(), CancelFlag::new()))
            .collect();

        let instance = Instance {
            definition: Arc::new(definition),
            dag: Arc::new(dag),
            instance_id,
            context,
            step_states,
            wait_manager,
            tool_invoker,
            ui_handler,
            executor,
            progress,
            cancel_flags: Arc::new(TokioRwLock::new(cancel_flags)),
            completed: Arc::new(TokioRwLock::new(HashSet::new())),
            failed: Arc::new(TokioRwLock::new(HashSet::new())),
            failed_step: Arc::new(TokioRwLock::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        info!(instance_id = %instance.instance_id, steps = instance.dag.len(), "workflow loaded");
        {
            let mut slot = self.instance.write().expect("engine instance poisoned");
            *slot = Some(instance);
        }
        self.set_status(WorkflowStatus::Idle);
        Ok(())
    }

    fn emit(&self, instance: &Instance, kind: EventKind, step_id: Option<&str>, payload: Value) {
        self.events.emit(WorkflowEvent::new(
            kind,
            instance.definition.id.clone(),
            instance.instance_id.clone(),
            step_id.map(|s| s.to_string()),
            payload,
        ));
    }

    /// Run the loaded workflow to completion. Rejects when nothing is
    /// loaded or a run is already in flight.
    #[instrument(skip(self, initial_globals))]
    pub async fn start(
        &self,
        initial_globals: Option<HashMap<String, Value>>,
    ) -> Result<WorkflowResult> {
        let instance = self.current_instance()?;
        match self.get_status() {
            WorkflowStatus::Idle => {}
            WorkflowStatus::Running | WorkflowStatus::Paused => {
                return Err(ExecutionError::InvalidState {
                    message: "workflow is already running".to_string(),
                });
            }
            status => {
                return Err(ExecutionError::InvalidState {
                    message: format!("workflow already finished ({}); reload to run again", status),
                });
            }
        }

        if let Some(globals) = initial_globals {
            for (key, value) in globals {
                instance.context.set_global(key, value).await;
            }
        }

        let mut result = WorkflowResult::new(
            instance.definition.id.clone(),
            instance.instance_id.clone(),
        );

        self.set_status(WorkflowStatus::Running);
        self.emit(
            &instance,
            EventKind::WorkflowStart,
            None,
            json!({
                "totalSteps": instance.dag.len(),
                "startTime": result.start_time.timestamp_millis(),
            }),
        );
        info!(workflow_id = %instance.definition.id, "workflow started");

        self.run_main_loop(&instance).await;

        let states: Vec<StepRuntimeState> = {
            let map = instance.step_states.read().await;
            map.values().cloned().collect()
        };
        result.summarize(&states);
        let snapshot = instance.context.snapshot().await;

        let completed_count = instance.completed.read().await.len();
        let failed = instance.failed.read().await.clone();
        let failed_step = instance.failed_step.read().await.clone();
        let percentage = instance.progress.percentage();

        if instance.cancelled.load(Ordering::SeqCst) {
            // cancel() already transitioned and emitted WorkflowFailed.
            let error = ExecutionError::Cancelled {
                reason: "workflow cancelled".to_string(),
            };
            result.finish(WorkflowStatus::Failed, Some(error), snapshot);
        } else if !failed.is_empty() {
            let error = self
                .first_failure_error(&instance, failed_step.as_deref())
                .await;
            self.set_status(WorkflowStatus::Failed);
            self.emit(
                &instance,
                EventKind::WorkflowFailed,
                None,
                json!({
                    "error": error.to_string(),
                    "errorName": error.name(),
                    "failedStepId": failed_step,
                    "totalSteps": instance.dag.len(),
                    "completedSteps": completed_count,
                    "percentage": percentage,
                    "endTime": chrono::Utc::now().timestamp_millis(),
                }),
            );
            warn!(workflow_id = %instance.definition.id, ?failed_step, "workflow failed");
            result.finish(WorkflowStatus::Failed, Some(error), snapshot);
        } else {
            self.set_status(WorkflowStatus::Completed);
            self.emit(
                &instance,
                EventKind::WorkflowComplete,
                None,
                json!({
                    "totalSteps": instance.dag.len(),
                    "completedSteps": completed_count,
                    "percentage": 100,
                    "endTime": chrono::Utc::now().timestamp_millis(),
                }),
            );
            info!(workflow_id = %instance.definition.id, "workflow completed");
            result.finish(WorkflowStatus::Completed, None, snapshot);
        }

        Ok(result)
    }

    async fn first_failure_error(
        &self,
        instance: &Instance,
        failed_step: Option<&str>,
    ) -> ExecutionError {
        if let Some(step_id) = failed_step {
            let states = instance.step_states.read().await;
            if let Some(state) = states.get(step_id) {
                return ExecutionError::StepExecution {
                    step_id: step_id.to_string(),
                    message: state.error.clone().unwrap_or_else(|| "step failed".to_string()),
                };
            }
        }
        ExecutionError::StepExecution {
            step_id: failed_step.unwrap_or("<unknown>").to_string(),
            message: "step failed".to_string(),
        }
    }

    async fn run_main_loop(&self, instance: &Instance) {
        loop {
            match self.get_status() {
                WorkflowStatus::Paused => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                WorkflowStatus::Running => {}
                _ => break,
            }

            let completed = instance.completed.read().await.clone();
            let failed = instance.failed.read().await.clone();

            let ready: Vec<String> = instance
                .dag
                .ready_steps(&completed)
                .into_iter()
                .filter(|s| !failed.contains(s))
                .collect();

            if ready.is_empty() {
                if completed.len() == instance.dag.len() {
                    break;
                }
                if !failed.is_empty() {
                    // Remaining work is gated behind a failure.
                    break;
                }
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(batch = ?ready, "dispatching ready steps");
            let handles: Vec<_> = ready
                .iter()
                .filter_map(|step_id| instance.definition.get_step(step_id).cloned())
                .map(|step| {
                    let engine = self.clone();
                    let instance = instance.clone();
                    tokio::spawn(async move { engine.run_step(&instance, step).await })
                })
                .collect();

            for joined in join_all(handles).await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("step task panicked: {}", e);
                        continue;
                    }
                };
                self.record_step_result(instance, result).await;
            }
        }
    }

    async fn record_step_result(&self, instance: &Instance, result: StepResult) {
        let step_id = result.step_id.clone();
        match result.status {
            StepStatus::Success | StepStatus::Skipped => {
                instance.completed.write().await.insert(step_id);
            }
            _ => {
                instance.failed.write().await.insert(step_id.clone());
                let mut failed_step = instance.failed_step.write().await;
                if failed_step.is_none() {
                    *failed_step = Some(step_id);
                }
            }
        }
    }

    async fn run_step(&self, instance: &Instance, step: Step) -> StepResult {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("engine semaphore closed");

        {
            let mut states = instance.step_states.write().await;
            if let Some(state) = states.get_mut(&step.id) {
                state.mark_started();
            }
        }
        instance.progress.record(&step.id, StepStatus::Running);

        let input = self.dependency_input(instance, &step.id).await;
        let body = self.make_body(instance, &step);
        let cancel = {
            let flags = instance.cancel_flags.read().await;
            flags.get(&step.id).cloned().unwrap_or_default()
        };

        let result = instance
            .executor
            .execute_step(&step, &instance.context, body, input, &cancel)
            .await;

        {
            let mut states = instance.step_states.write().await;
            if let Some(state) = states.get_mut(&step.id) {
                state.attempts = match result.status {
                    StepStatus::Skipped => 0,
                    _ => result.retry_count + 1,
                };
                state.mark_finished(
                    result.status,
                    result.error.as_ref().map(|e| e.to_string()),
                );
            }
        }
        instance.progress.record(&step.id, result.status);
        if result.status.counts_as_completed() {
            instance.progress.emit_progress(Some(&step.id));
        }

        result
    }

    /// Input handed to a step body: nothing, the single dependency's
    /// output, or a map keyed by dependency id.
    async fn dependency_input(&self, instance: &Instance, step_id: &str) -> Value {
        let deps = instance.dag.dependencies(step_id);
        match deps.len() {
            0 => Value::Null,
            1 => instance
                .context
                .get_step_output(&deps[0])
                .await
                .unwrap_or(Value::Null),
            _ => {
                let mut map = serde_json::Map::new();
                for dep in deps {
                    let output = instance
                        .context
                        .get_step_output(dep)
                        .await
                        .unwrap_or(Value::Null);
                    map.insert(dep.clone(), output);
                }
                Value::Object(map)
            }
        }
    }

    /// Body dispatch priority: UI interaction, then tool invocations, then
    /// pass-through.
    fn make_body(&self, instance: &Instance, step: &Step) -> StepBody {
        let step = step.clone();
        let ui_handler = instance.ui_handler.clone();
        let tool_invoker = instance.tool_invoker.clone();
        let context = instance.context.clone();

        Arc::new(move |input| {
            let step = step.clone();
            let ui_handler = ui_handler.clone();
            let tool_invoker = tool_invoker.clone();
            let context = context.clone();
            Box::pin(async move {
                if let Some(ref ui_config) = step.ui {
                    ui_handler.handle_ui(&step.id, ui_config, &context).await
                } else if !step.tools.is_empty() {
                    tool_invoker
                        .execute_tool_invocations(&step.tools, &context, &step.id)
                        .await
                } else {
                    Ok(input)
                }
            })
        })
    }

    /// Stop scheduling new batches; in-flight steps run to completion.
    pub fn pause(&self) -> Result<()> {
        let mut status = self.status.write().expect("engine status poisoned");
        if *status != WorkflowStatus::Running {
            return Err(ExecutionError::InvalidState {
                message: format!("cannot pause while {}", status),
            });
        }
        *status = WorkflowStatus::Paused;
        info!("workflow paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut status = self.status.write().expect("engine status poisoned");
        if *status != WorkflowStatus::Paused {
            return Err(ExecutionError::InvalidState {
                message: format!("cannot resume while {}", status),
            });
        }
        *status = WorkflowStatus::Running;
        info!("workflow resumed");
        Ok(())
    }

    /// Fail the workflow: every active wait is rejected, step cancellation
    /// flags are set, and the main loop exits at its next check.
    pub async fn cancel(&self) -> Result<()> {
        let instance = self.current_instance()?;
        if !matches!(
            self.get_status(),
            WorkflowStatus::Running | WorkflowStatus::Paused
        ) {
            return Err(ExecutionError::InvalidState {
                message: "no running workflow to cancel".to_string(),
            });
        }

        instance.cancelled.store(true, Ordering::SeqCst);
        self.set_status(WorkflowStatus::Failed);

        {
            let flags = instance.cancel_flags.read().await;
            for flag in flags.values() {
                flag.cancel();
            }
        }
        instance.wait_manager.cancel_all_waits("workflow cancelled").await;

        self.emit(
            &instance,
            EventKind::WorkflowFailed,
            None,
            json!({
                "error": "workflow cancelled",
                "errorName": "CancelledError",
                "totalSteps": instance.dag.len(),
                "completedSteps": instance.completed.read().await.len(),
                "percentage": instance.progress.percentage(),
                "endTime": chrono::Utc::now().timestamp_millis(),
            }),
        );
        warn!("workflow cancelled");
        Ok(())
    }

    // --- Event subscription -------------------------------------------------

    pub fn on(&self, handler: EventHandler) -> u64 {
        self.events.subscribe(handler)
    }

    pub fn on_kind(&self, kind: EventKind, handler: EventHandler) -> u64 {
        self.events.subscribe_kind(kind, handler)
    }

    pub fn off(&self, subscription_id: u64) -> bool {
        self.events.unsubscribe(subscription_id)
    }

    // --- External responses -------------------------------------------------

    pub async fn respond_to_ui(&self, step_id: &str, response: UIRenderResult) -> Result<()> {
        let instance = self.current_instance()?;
        instance.ui_handler.respond_to_ui(step_id, response).await
    }

    pub async fn respond_to_tool(&self, step_id: &str, tool_id: &str, result: Value) -> Result<()> {
        let instance = self.current_instance()?;
        instance.tool_invoker.respond_to_tool(step_id, tool_id, result).await
    }

    pub async fn respond_to_tool_error(
        &self,
        step_id: &str,
        tool_id: &str,
        error: String,
    ) -> Result<()> {
        let instance = self.current_instance()?;
        instance
            .tool_invoker
            .respond_to_tool_error(step_id, tool_id, error)
            .await
    }

    // --- Registries ---------------------------------------------------------

    pub fn register_tool(&self, meta: ToolMeta, executor: Arc<dyn ToolExecutor>) -> Result<()> {
        self.tool_registry.register(meta, executor)
    }

    pub fn unregister_tool(&self, tool_id: &str) -> bool {
        self.tool_registry.unregister(tool_id)
    }

    pub fn register_ui_component(
        &self,
        meta: UIComponentMeta,
        renderer: Arc<dyn UIRenderer>,
    ) -> Result<()> {
        self.ui_registry.register(meta, renderer)
    }

    pub fn unregister_ui_component(&self, component_id: &str) -> bool {
        self.ui_registry.unregister(component_id)
    }

    pub fn register_step_type(&self, meta: StepTypeMeta) {
        self.step_types.register(meta);
    }

    pub fn add_global_hook(&self, phase: HookPhase, hook: Arc<dyn Hook>) {
        self.hook_manager.add_global_hook(phase, hook);
    }

    pub fn remove_global_hook(&self, phase: HookPhase, hook_id: &str) -> bool {
        self.hook_manager.remove_global_hook(phase, hook_id)
    }

    // --- Queries ------------------------------------------------------------

    /// Live handle to the instance context. Callers should treat it as
    /// read-only; writes belong to hooks and tools during execution.
    pub fn get_context(&self) -> Result<ExecutionContext> {
        Ok(self.current_instance()?.context)
    }

    pub fn get_step_bar_state(&self) -> Result<StepBarState> {
        Ok(self.current_instance()?.progress.step_bar_state())
    }

    pub fn get_registered_tools(&self) -> Vec<ToolMeta> {
        self.tool_registry.get_all()
    }

    pub fn get_registered_ui_components(&self) -> Vec<UIComponentMeta> {
        self.ui_registry.get_all()
    }

    pub fn get_registered_step_types(&self) -> Vec<StepTypeMeta> {
        self.step_types.get_all()
    }

    /// Same checks as `load_workflow`, without touching engine state.
    pub fn validate_workflow_definition(&self, definition: &Definition) -> ValidationReport {
        DefinitionValidator::new().validate(definition)
    }

    /// Canonical JSON export of the loaded definition.
    pub fn export_definition(&self) -> Result<String> {
        let instance = self.current_instance()?;
        instance
            .definition
            .to_json()
            .map_err(|e| ExecutionError::InvalidState {
                message: format!("export failed: {}", e),
            })
    }

    /// Parse and re-validate a definition from canonical JSON. Imported
    /// callbacks are inert until re-bound.
    pub fn import_definition(&self, json: &str) -> Result<Definition> {
        let definition = Definition::from_json(json).map_err(|e| ExecutionError::Validation {
            issues: vec![e.to_string()],
        })?;
        let report = self.validate_workflow_definition(&definition);
        if !report.is_valid {
            return Err(ExecutionError::Validation {
                issues: report.errors.iter().map(|e| e.to_string()).collect(),
            });
        }
        Ok(definition)
    }

    pub async fn get_stats(&self) -> EngineStats {
        let (running, waiting) = match self.current_instance() {
            Ok(instance) => {
                let states = instance.step_states.read().await;
                let running = states
                    .values()
                    .filter(|s| s.status == StepStatus::Running)
                    .count();
                let waiting = states
                    .values()
                    .filter(|s| s.status == StepStatus::WaitingInput)
                    .count();
                (running, waiting)
            }
            Err(_) => (0, 0),
        };

        EngineStats {
            running_steps: running,
            waiting_steps: waiting,
            max_concurrent_steps: self.config.max_concurrent_steps,
            available_slots: self.semaphore.available_permits(),
        }
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}
