// ABOUTME: Error types for workflow definition parsing and validation
// ABOUTME: Defines specific error types for the definition module

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read definition file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported definition format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Cyclic dependency detected in steps: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Duplicate step id: {step}")]
    DuplicateStep { step: String },

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Invalid skip condition in step '{step}': {error}")]
    InvalidCondition { step: String, error: String },

    #[error("Empty workflow: no steps defined")]
    EmptyWorkflow,

    #[error("Missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
