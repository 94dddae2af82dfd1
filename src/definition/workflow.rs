// ABOUTME: Core workflow definition structure and parsing functionality
// ABOUTME: Defines the Definition struct with YAML/JSON loading and canonical export

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::error::{DefinitionError, Result, ValidationError};
use super::step::Step;
use crate::engine::hooks::HookSet;

/// A declarative workflow: an identifier plus an ordered list of steps.
///
/// Definitions are immutable after load; the engine builds its DAG and
/// per-instance runtime state from a shared reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_hooks: Option<HookSet>,
}

impl Definition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
            global_hooks: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_global_hooks(mut self, hooks: HookSet) -> Self {
        self.global_hooks = Some(hooks);
        self
    }

    /// Parse a definition from a file, dispatching on extension
    /// (`.yaml`/`.yml` or `.json`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(DefinitionError::IoError)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(DefinitionError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Parse a definition from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: Definition =
            serde_yaml::from_str(content).map_err(DefinitionError::YamlError)?;
        definition.validate_structure()?;
        Ok(definition)
    }

    /// Parse a definition from canonical JSON, as produced by
    /// [`Definition::to_json`]. Callback fields (hooks, skip predicates)
    /// come back inert until re-bound by the caller.
    pub fn from_json(content: &str) -> Result<Self> {
        let definition: Definition =
            serde_json::from_str(content).map_err(DefinitionError::JsonError)?;
        definition.validate_structure()?;
        Ok(definition)
    }

    /// Canonical JSON export. Optional fields are emitted only when
    /// present; callbacks are reduced to their lossy source descriptions.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(DefinitionError::JsonError)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DefinitionError::YamlError)
    }

    /// Basic structural checks: non-empty identifiers, at least one step,
    /// per-step id/name/type, id uniqueness.
    pub fn validate_structure(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::MissingField("id".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(DefinitionError::MissingField("name".to_string()));
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::ValidationError(ValidationError::EmptyWorkflow));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(DefinitionError::ValidationError(ValidationError::MissingField(
                    "step.id".to_string(),
                )));
            }
            if step.name.trim().is_empty() {
                return Err(DefinitionError::ValidationError(ValidationError::InvalidStep {
                    step: step.id.clone(),
                    reason: "name cannot be empty".to_string(),
                }));
            }
            if step.step_type.trim().is_empty() {
                return Err(DefinitionError::ValidationError(ValidationError::InvalidStep {
                    step: step.id.clone(),
                    reason: "type cannot be empty".to_string(),
                }));
            }
            if !seen.insert(step.id.clone()) {
                return Err(DefinitionError::ValidationError(ValidationError::DuplicateStep {
                    step: step.id.clone(),
                }));
            }
        }

        Ok(())
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    pub fn get_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.id == step_id)
    }

    /// Steps that list `step_id` among their dependencies.
    pub fn dependent_steps(&self, step_id: &str) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == step_id))
            .map(|s| s.id.clone())
            .collect()
    }
}
