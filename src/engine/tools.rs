// ABOUTME: Tool registry and invoker for sync/async tool dispatch
// ABOUTME: Handles schema validation, per-call timeouts and external response matching

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::schema::Schema;
use super::wait::{WaitKind, WaitManager};
use crate::definition::step::ToolInvocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// The engine calls the executor directly.
    Sync,
    /// The executor is ignored at call time; an external caller resolves
    /// the invocation through `respond_to_tool`.
    Async,
}

/// Declarative description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mode: ToolMode,
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
}

impl ToolMeta {
    pub fn sync(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            mode: ToolMode::Sync,
            timeout: None,
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn asynchronous(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut meta = Self::sync(id, name);
        meta.mode = ToolMode::Async;
        meta
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Callable side of a tool registration.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, params: Value, context: &ExecutionContext) -> Result<Value>;
}

#[derive(Clone)]
pub struct ToolRegistration {
    pub meta: ToolMeta,
    pub executor: Arc<dyn ToolExecutor>,
}

/// Name-indexed catalog of tools. Registering a duplicate id fails rather
/// than overwriting.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolRegistration>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, meta: ToolMeta, executor: Arc<dyn ToolExecutor>) -> Result<()> {
        let mut tools = self.tools.write().expect("tool registry poisoned");
        if tools.contains_key(&meta.id) {
            return Err(ExecutionError::DuplicateRegistration { id: meta.id });
        }
        let id = meta.id.clone();
        tools.insert(id, ToolRegistration { meta, executor });
        Ok(())
    }

    pub fn unregister(&self, tool_id: &str) -> bool {
        let mut tools = self.tools.write().expect("tool registry poisoned");
        tools.remove(tool_id).is_some()
    }

    pub fn get(&self, tool_id: &str) -> Result<ToolRegistration> {
        let tools = self.tools.read().expect("tool registry poisoned");
        tools
            .get(tool_id)
            .cloned()
            .ok_or_else(|| ExecutionError::ToolNotFound {
                tool_id: tool_id.to_string(),
            })
    }

    pub fn has(&self, tool_id: &str) -> bool {
        let tools = self.tools.read().expect("tool registry poisoned");
        tools.contains_key(tool_id)
    }

    /// Metadata of every registered tool.
    pub fn get_all(&self) -> Vec<ToolMeta> {
        let tools = self.tools.read().expect("tool registry poisoned");
        tools.values().map(|r| r.meta.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.tools.read().expect("tool registry poisoned").len()
    }

    pub fn clear(&self) {
        self.tools.write().expect("tool registry poisoned").clear();
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub tool_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<ExecutionError>,
    pub duration: Duration,
}

impl ToolCallResult {
    fn ok(tool_id: String, result: Value, duration: Duration) -> Self {
        Self {
            tool_id,
            success: true,
            result: Some(result),
            error: None,
            duration,
        }
    }

    fn failed(tool_id: String, error: ExecutionError, duration: Duration) -> Self {
        Self {
            tool_id,
            success: false,
            result: None,
            error: Some(error),
            duration,
        }
    }
}

struct PendingCall {
    tool_id: String,
    error_response: Option<String>,
}

/// Dispatches tool invocations for one workflow instance.
#[derive(Clone)]
pub struct ToolInvoker {
    workflow_id: String,
    instance_id: String,
    registry: Arc<ToolRegistry>,
    events: EventBus,
    wait_manager: WaitManager,
    default_timeout: Option<Duration>,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
}

impl ToolInvoker {
    pub fn new(
        workflow_id: String,
        instance_id: String,
        registry: Arc<ToolRegistry>,
        events: EventBus,
        wait_manager: WaitManager,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            workflow_id,
            instance_id,
            registry,
            events,
            wait_manager,
            default_timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn emit(&self, kind: EventKind, step_id: Option<&str>, payload: Value) {
        self.events.emit(WorkflowEvent::new(
            kind,
            self.workflow_id.clone(),
            self.instance_id.clone(),
            step_id.map(|s| s.to_string()),
            payload,
        ));
    }

    /// Invoke a tool by id. Lookup and schema failures come back as failed
    /// results, not panics or hard errors, so a step body can surface them
    /// uniformly.
    pub async fn invoke(
        &self,
        tool_id: &str,
        params: Value,
        context: &ExecutionContext,
        step_id: Option<&str>,
    ) -> ToolCallResult {
        let started = Instant::now();

        let registration = match self.registry.get(tool_id) {
            Ok(registration) => registration,
            Err(e) => {
                return ToolCallResult::failed(tool_id.to_string(), e, started.elapsed());
            }
        };

        if let Some(ref schema) = registration.meta.input_schema {
            if let Err(failures) = schema.validate(&params) {
                let error = ExecutionError::SchemaValidation { failures };
                self.emit(
                    EventKind::ToolFailed,
                    step_id,
                    json!({"toolId": tool_id, "error": error.to_string()}),
                );
                return ToolCallResult::failed(tool_id.to_string(), error, started.elapsed());
            }
        }

        self.emit(
            EventKind::ToolInvoke,
            step_id,
            json!({
                "toolId": tool_id,
                "params": params,
                "mode": registration.meta.mode,
            }),
        );

        let timeout = registration.meta.timeout.or(self.default_timeout);
        let outcome = match registration.meta.mode {
            ToolMode::Sync => {
                self.run_sync(&registration, params, context, step_id, timeout)
                    .await
            }
            ToolMode::Async => self.run_async(tool_id, step_id, timeout).await,
        };

        let duration = started.elapsed();
        match outcome {
            Ok(result) => {
                self.emit(
                    EventKind::ToolComplete,
                    step_id,
                    json!({
                        "toolId": tool_id,
                        "result": result,
                        "duration": duration.as_millis() as u64,
                    }),
                );
                ToolCallResult::ok(tool_id.to_string(), result, duration)
            }
            Err(error) => {
                self.emit(
                    EventKind::ToolFailed,
                    step_id,
                    json!({
                        "toolId": tool_id,
                        "error": error.to_string(),
                        "duration": duration.as_millis() as u64,
                    }),
                );
                ToolCallResult::failed(tool_id.to_string(), error, duration)
            }
        }
    }

    async fn run_sync(
        &self,
        registration: &ToolRegistration,
        params: Value,
        context: &ExecutionContext,
        step_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let call = registration.executor.execute(params, context);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout {
                    step_id: step_id.map(|s| s.to_string()),
                    timeout: limit,
                }),
            },
            None => call.await,
        };

        result.map_err(|e| match e {
            // Preserve timeouts as-is; wrap everything else.
            ExecutionError::Timeout { .. } => e,
            other => ExecutionError::ToolExecution {
                tool_id: registration.meta.id.clone(),
                step_id: step_id.unwrap_or("").to_string(),
                message: other.to_string(),
            },
        })
    }

    async fn run_async(
        &self,
        tool_id: &str,
        step_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let step_id = step_id.ok_or_else(|| ExecutionError::InvalidState {
            message: format!("async tool '{}' requires a step context", tool_id),
        })?;

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                step_id.to_string(),
                PendingCall {
                    tool_id: tool_id.to_string(),
                    error_response: None,
                },
            );
        }

        let future = self
            .wait_manager
            .start_wait(step_id, WaitKind::Tool, tool_id, timeout, None)
            .await;

        let result = match future {
            Ok(future) => future.wait().await,
            Err(e) => Err(e),
        };

        let error_response = {
            let mut pending = self.pending.lock().await;
            pending.remove(step_id).and_then(|call| call.error_response)
        };

        match result {
            Ok(value) => Ok(value),
            Err(ExecutionError::WaitCancelled { .. }) if error_response.is_some() => {
                Err(ExecutionError::ToolExecution {
                    tool_id: tool_id.to_string(),
                    step_id: step_id.to_string(),
                    message: error_response.expect("checked above"),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// External success path for a pending async call.
    pub async fn respond_to_tool(&self, step_id: &str, tool_id: &str, result: Value) -> Result<()> {
        self.check_pending(step_id, tool_id).await?;
        if self.wait_manager.resume_wait(step_id, result).await {
            Ok(())
        } else {
            Err(ExecutionError::InvalidState {
                message: format!("no pending wait for step '{}'", step_id),
            })
        }
    }

    /// External failure path for a pending async call.
    pub async fn respond_to_tool_error(
        &self,
        step_id: &str,
        tool_id: &str,
        error: String,
    ) -> Result<()> {
        self.check_pending(step_id, tool_id).await?;
        {
            let mut pending = self.pending.lock().await;
            if let Some(call) = pending.get_mut(step_id) {
                call.error_response = Some(error.clone());
            }
        }
        self.wait_manager.cancel_wait(step_id, &error).await;
        Ok(())
    }

    async fn check_pending(&self, step_id: &str, tool_id: &str) -> Result<()> {
        let pending = self.pending.lock().await;
        match pending.get(step_id) {
            Some(call) if call.tool_id == tool_id => Ok(()),
            Some(call) => Err(ExecutionError::InvalidState {
                message: format!(
                    "step '{}' is waiting on tool '{}', not '{}'",
                    step_id, call.tool_id, tool_id
                ),
            }),
            None => Err(ExecutionError::InvalidState {
                message: format!("no pending tool call for step '{}'", step_id),
            }),
        }
    }

    /// Reject pending async calls for a step, optionally narrowed to a
    /// single tool id.
    pub async fn cancel_pending_calls(&self, step_id: &str, tool_id: Option<&str>) -> bool {
        let matches = {
            let pending = self.pending.lock().await;
            match (pending.get(step_id), tool_id) {
                (Some(call), Some(tool_id)) => call.tool_id == tool_id,
                (Some(_), None) => true,
                (None, _) => false,
            }
        };

        if !matches {
            return false;
        }
        self.wait_manager.cancel_wait(step_id, "tool call cancelled").await
    }

    /// Run a step's tool invocations sequentially, stopping on the first
    /// failure. Successful results land in `globals[output_key]` when an
    /// output key is declared; the aggregated list is the caller's step
    /// output.
    pub async fn execute_tool_invocations(
        &self,
        invocations: &[ToolInvocation],
        context: &ExecutionContext,
        step_id: &str,
    ) -> Result<Value> {
        let mut results = Vec::with_capacity(invocations.len());

        for invocation in invocations {
            let params = invocation.params.clone().unwrap_or(Value::Null);
            debug!(step_id, tool_id = %invocation.tool_id, "invoking tool");
            let call = self
                .invoke(&invocation.tool_id, params, context, Some(step_id))
                .await;

            if !call.success {
                let error = call.error.unwrap_or_else(|| ExecutionError::ToolExecution {
                    tool_id: invocation.tool_id.clone(),
                    step_id: step_id.to_string(),
                    message: "tool call failed".to_string(),
                });
                warn!(step_id, tool_id = %invocation.tool_id, "tool invocation failed: {}", error);
                return Err(error);
            }

            let result = call.result.unwrap_or(Value::Null);
            if let Some(ref output_key) = invocation.output_key {
                context.set_global(output_key.clone(), result.clone()).await;
            }
            results.push(json!({
                "toolId": invocation.tool_id,
                "result": result,
            }));
        }

        Ok(Value::Array(results))
    }
}
