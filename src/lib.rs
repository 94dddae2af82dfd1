// ABOUTME: Main library module for the waypoint workflow engine
// ABOUTME: Exports the definition model and the execution engine

pub mod definition;
pub mod engine;

// Re-export commonly used types
pub use definition::{
    Definition, DefinitionValidator, RetryPolicy, SkipPolicy, Step, ToolInvocation, UIConfig,
    UIMode, UIOption, ValidationReport,
};
pub use engine::{
    EngineConfig, EventKind, ExecutionContext, ExecutionError, Hook, HookContext, HookPhase,
    HookSet, Schema, SchemaType, SkipPredicate, StepStatus, TimeoutStrategy, ToolExecutor,
    ToolMeta, ToolMode, UIComponentMeta, UIRenderResult, UIRenderer, WaitKind, WorkflowEngine,
    WorkflowEvent, WorkflowResult, WorkflowStatus,
};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
