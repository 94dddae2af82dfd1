// ABOUTME: Error types for workflow engine operations
// ABOUTME: Defines the runtime error taxonomy for step, tool, UI and wait failures

use std::time::Duration;
use thiserror::Error;

/// Pipeline phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Before,
    After,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::Before => write!(f, "before"),
            HookPhase::After => write!(f, "after"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Invalid workflow definition: {}", issues.join("; "))]
    Validation { issues: Vec<String> },

    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    #[error("Tool not found: {tool_id}")]
    ToolNotFound { tool_id: String },

    #[error("UI component not found: {component_id}")]
    UIComponentNotFound { component_id: String },

    #[error("Schema validation failed: {}", failures.join("; "))]
    SchemaValidation { failures: Vec<String> },

    #[error("Timed out after {timeout:?} (step: {step_id:?})")]
    Timeout {
        step_id: Option<String>,
        timeout: Duration,
    },

    #[error("Hook '{hook_id}' ({phase}) failed in step '{step_id}': {message}")]
    HookExecution {
        hook_id: String,
        phase: HookPhase,
        step_id: String,
        message: String,
    },

    #[error("Tool '{tool_id}' failed in step '{step_id}': {message}")]
    ToolExecution {
        tool_id: String,
        step_id: String,
        message: String,
    },

    #[error("Wait cancelled for step '{step_id}': {reason}")]
    WaitCancelled { step_id: String, reason: String },

    #[error("Workflow cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Duplicate registration: {id}")]
    DuplicateRegistration { id: String },

    #[error("Invalid engine state: {message}")]
    InvalidState { message: String },
}

impl ExecutionError {
    /// Short stable name used in event payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionError::Validation { .. } => "ValidationError",
            ExecutionError::CyclicDependency { .. } => "CyclicDependencyError",
            ExecutionError::StepExecution { .. } => "StepExecutionError",
            ExecutionError::ToolNotFound { .. } => "ToolNotFoundError",
            ExecutionError::UIComponentNotFound { .. } => "UIComponentNotFoundError",
            ExecutionError::SchemaValidation { .. } => "SchemaValidationError",
            ExecutionError::Timeout { .. } => "TimeoutError",
            ExecutionError::HookExecution { .. } => "HookExecutionError",
            ExecutionError::ToolExecution { .. } => "ToolExecutionError",
            ExecutionError::WaitCancelled { .. } => "WaitCancelledError",
            ExecutionError::Cancelled { .. } => "CancelledError",
            ExecutionError::DuplicateRegistration { .. } => "DuplicateRegistrationError",
            ExecutionError::InvalidState { .. } => "InvalidStateError",
        }
    }

    /// True when the error represents a cancellation rather than a failure
    /// of the step body itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ExecutionError::Cancelled { .. } | ExecutionError::WaitCancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
