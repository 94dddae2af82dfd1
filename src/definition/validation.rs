// ABOUTME: Workflow definition validation logic and dependency checking
// ABOUTME: Produces a structured report of errors and warnings for a definition

use std::collections::HashSet;

use super::error::ValidationError;
use super::workflow::Definition;
use crate::definition::step::UIMode;
use crate::engine::condition;
use crate::engine::dag::Dag;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validates a definition beyond the structural checks performed at parse
/// time: dependency integrity, cycles, policy sanity, UI and tool shapes.
pub struct DefinitionValidator;

impl DefinitionValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, definition: &Definition) -> ValidationReport {
        let mut report = ValidationReport::new();

        if let Err(e) = definition.validate_structure() {
            report.errors.push(match e {
                super::error::DefinitionError::ValidationError(v) => v,
                other => ValidationError::MissingField(other.to_string()),
            });
        }

        self.validate_dependencies(definition, &mut report);
        self.validate_policies(definition, &mut report);
        self.validate_interactions(definition, &mut report);

        report.is_valid = report.errors.is_empty();
        report
    }

    fn validate_dependencies(&self, definition: &Definition, report: &mut ValidationReport) {
        let step_ids: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();

        for step in &definition.steps {
            for dep in &step.dependencies {
                if !step_ids.contains(dep.as_str()) {
                    report.errors.push(ValidationError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Cycle detection only makes sense once the edge set is closed.
        if report.errors.is_empty() {
            if let Ok(dag) = Dag::build(definition) {
                if let Some(cycle) = dag.detect_cycle() {
                    report.errors.push(ValidationError::CyclicDependency { cycle });
                }
            }
        }
    }

    fn validate_policies(&self, definition: &Definition, report: &mut ValidationReport) {
        for step in &definition.steps {
            if let Some(ref retry) = step.retry_policy {
                if retry.exponential_backoff && retry.multiplier <= 0.0 {
                    report.errors.push(ValidationError::InvalidStep {
                        step: step.id.clone(),
                        reason: "backoff multiplier must be greater than 0".to_string(),
                    });
                }
            }

            if let Some(ref skip) = step.skip_policy {
                if let Some(ref expr) = skip.condition {
                    if let Err(e) = condition::parse(expr) {
                        report.warnings.push(format!(
                            "Step '{}' has an unparseable skip condition ({}); it will never skip",
                            step.id, e
                        ));
                    }
                }
                if skip.condition.is_none() && skip.predicate.is_none() {
                    report.warnings.push(format!(
                        "Step '{}' has a skip policy with no condition or predicate",
                        step.id
                    ));
                }
            }
        }
    }

    fn validate_interactions(&self, definition: &Definition, report: &mut ValidationReport) {
        for step in &definition.steps {
            if let Some(ref ui) = step.ui {
                if ui.component_id.trim().is_empty() {
                    report.errors.push(ValidationError::InvalidStep {
                        step: step.id.clone(),
                        reason: "ui.componentId cannot be empty".to_string(),
                    });
                }
                if ui.mode == UIMode::Select && ui.options.is_empty() {
                    report.errors.push(ValidationError::InvalidStep {
                        step: step.id.clone(),
                        reason: "select interactions require at least one option".to_string(),
                    });
                }
            }

            for invocation in &step.tools {
                if invocation.tool_id.trim().is_empty() {
                    report.errors.push(ValidationError::InvalidStep {
                        step: step.id.clone(),
                        reason: "tool invocation is missing a toolId".to_string(),
                    });
                }
            }
        }
    }
}

impl Default for DefinitionValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::step::{Step, UIConfig, UIOption};
    use serde_json::Value;

    fn two_step_definition() -> Definition {
        Definition::new("wf", "Workflow")
            .with_step(Step::new("a", "A", "task"))
            .with_step(Step::new("b", "B", "task").with_dependencies(vec!["a".into()]))
    }

    #[test]
    fn test_valid_definition() {
        let report = DefinitionValidator::new().validate(&two_step_definition());
        assert!(report.is_valid);
        assert!(!report.has_errors());
    }

    #[test]
    fn test_unknown_dependency() {
        let definition = Definition::new("wf", "Workflow")
            .with_step(Step::new("a", "A", "task").with_dependencies(vec!["ghost".into()]));

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.has_errors());
        assert!(matches!(
            report.errors[0],
            ValidationError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let definition = Definition::new("wf", "Workflow")
            .with_step(Step::new("a", "A", "task").with_dependencies(vec!["b".into()]))
            .with_step(Step::new("b", "B", "task").with_dependencies(vec!["a".into()]));

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.has_errors());
        assert!(matches!(
            report.errors[0],
            ValidationError::CyclicDependency { .. }
        ));
    }

    #[test]
    fn test_select_without_options() {
        let ui = UIConfig {
            component_id: "picker".into(),
            mode: UIMode::Select,
            data: Value::Null,
            timeout: None,
            options: Vec::new(),
        };
        let definition =
            Definition::new("wf", "Workflow").with_step(Step::new("s", "S", "ui").with_ui(ui));

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.has_errors());
    }

    #[test]
    fn test_unparseable_condition_warns_only() {
        let definition = Definition::new("wf", "Workflow").with_step(
            Step::new("s", "S", "task")
                .with_skip_policy(crate::definition::step::SkipPolicy::expression("== == ==")),
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.is_valid);
        assert!(report.has_warnings());
    }

    #[test]
    fn test_select_with_options_is_valid() {
        let ui = UIConfig {
            component_id: "picker".into(),
            mode: UIMode::Select,
            data: Value::Null,
            timeout: None,
            options: vec![UIOption {
                id: "yes".into(),
                label: "Yes".into(),
                value: None,
                next_step_id: None,
            }],
        };
        let definition =
            Definition::new("wf", "Workflow").with_step(Step::new("s", "S", "ui").with_ui(ui));

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.is_valid);
    }
}
