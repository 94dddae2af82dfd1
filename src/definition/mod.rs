// ABOUTME: Definition module for declarative workflow descriptions
// ABOUTME: Exports workflow parsing, validation, and data structures

pub mod error;
pub mod step;
pub mod validation;
pub mod workflow;

pub use error::{DefinitionError, ValidationError};
pub use step::{RetryPolicy, SkipPolicy, Step, ToolInvocation, UIConfig, UIMode, UIOption};
pub use validation::{DefinitionValidator, ValidationReport};
pub use workflow::Definition;
