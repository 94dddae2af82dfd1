// ABOUTME: Workflow execution engine module
// ABOUTME: Exports the orchestrator and its collaborating subsystems

pub mod condition;
pub mod context;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod hooks;
pub mod orchestrator;
pub mod policies;
pub mod progress;
pub mod result;
pub mod schema;
pub mod tools;
pub mod ui;
pub mod wait;

pub use context::{ContextSnapshot, ExecutionContext};
pub use dag::Dag;
pub use error::{ExecutionError, HookPhase, Result};
pub use events::{EventBus, EventHandler, EventKind, WorkflowEvent};
pub use executor::{CancelFlag, StepBody, StepExecutor};
pub use hooks::{Hook, HookContext, HookManager, HookSet, InertHook};
pub use orchestrator::{EngineConfig, EngineStats, StepTypeMeta, StepTypeRegistry, WorkflowEngine};
pub use policies::SkipPredicate;
pub use progress::{ProgressTracker, StepBarEntry, StepBarState};
pub use result::{
    SharedStepStates, StepResult, StepRuntimeState, StepStatus, WorkflowResult, WorkflowStatus,
};
pub use schema::{Schema, SchemaType};
pub use tools::{ToolCallResult, ToolExecutor, ToolInvoker, ToolMeta, ToolMode, ToolRegistry};
pub use ui::{
    UIComponentMeta, UIInteractionHandler, UIRegistry, UIRenderResult, UIRenderer,
};
pub use wait::{TimeoutStrategy, WaitFuture, WaitKind, WaitManager, WaitingInfo};
