// ABOUTME: Step and workflow result types and runtime state tracking
// ABOUTME: Defines status enums, per-step runtime state and aggregated results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::context::ContextSnapshot;
use super::error::ExecutionError;
use super::wait::WaitingInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    WaitingInput,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// True for statuses that satisfy downstream dependencies.
    pub fn counts_as_completed(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::WaitingInput => write!(f, "waiting_input"),
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Idle => write!(f, "idle"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable per-step bookkeeping owned by the engine for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRuntimeState {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<WaitingInfo>,
}

impl StepRuntimeState {
    pub fn new(step_id: String) -> Self {
        Self {
            step_id,
            status: StepStatus::Pending,
            attempts: 0,
            start_time: None,
            end_time: None,
            error: None,
            waiting_for: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = StepStatus::Running;
        self.start_time = Some(Utc::now());
    }

    pub fn mark_finished(&mut self, status: StepStatus, error: Option<String>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.error = error;
        self.waiting_for = None;
    }
}

/// Shared handle to the per-step runtime states of one instance. The
/// engine owns the map; the wait manager and progress tracker update the
/// waiting/active bookkeeping through the same handle.
pub type SharedStepStates =
    std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, StepRuntimeState>>>;

/// Outcome of a single step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<ExecutionError>,
    pub retry_count: u32,
    /// Non-fatal error collected from the after-hook chain; never changes
    /// the step status.
    pub hook_error: Option<ExecutionError>,
}

impl StepResult {
    pub fn success(step_id: String, output: Value, retry_count: u32) -> Self {
        Self {
            step_id,
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            retry_count,
            hook_error: None,
        }
    }

    pub fn failed(step_id: String, error: ExecutionError, retry_count: u32) -> Self {
        Self {
            step_id,
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            retry_count,
            hook_error: None,
        }
    }

    pub fn skipped(step_id: String, output: Option<Value>) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            output,
            error: None,
            retry_count: 0,
            hook_error: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub total_steps: usize,
    pub succeeded_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub success_rate: f64,
}

/// Aggregated outcome of a workflow run, returned by `start`.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub instance_id: String,
    pub status: WorkflowStatus,
    pub context_snapshot: ContextSnapshot,
    pub error: Option<ExecutionError>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub summary: WorkflowSummary,
}

impl WorkflowResult {
    pub fn new(workflow_id: String, instance_id: String) -> Self {
        Self {
            workflow_id,
            instance_id,
            status: WorkflowStatus::Running,
            context_snapshot: ContextSnapshot::default(),
            error: None,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            summary: WorkflowSummary::default(),
        }
    }

    pub fn finish(
        &mut self,
        status: WorkflowStatus,
        error: Option<ExecutionError>,
        context_snapshot: ContextSnapshot,
    ) {
        let end = Utc::now();
        self.status = status;
        self.error = error;
        self.context_snapshot = context_snapshot;
        self.end_time = Some(end);
        self.duration = Some((end - self.start_time).to_std().unwrap_or(Duration::ZERO));
    }

    pub fn summarize(&mut self, states: &[StepRuntimeState]) {
        let total = states.len();
        let succeeded = states.iter().filter(|s| s.status == StepStatus::Success).count();
        let failed = states.iter().filter(|s| s.status == StepStatus::Failed).count();
        let skipped = states.iter().filter(|s| s.status == StepStatus::Skipped).count();
        let success_rate = if total > 0 {
            (succeeded as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        self.summary = WorkflowSummary {
            total_steps: total,
            succeeded_steps: succeeded,
            failed_steps: failed,
            skipped_steps: skipped,
            success_rate,
        };
    }
}
