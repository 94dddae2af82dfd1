// ABOUTME: Step configuration structures and per-step policy definitions
// ABOUTME: Defines steps, retry/skip policies, UI configs and tool invocations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::hooks::HookSet;
use crate::engine::policies::SkipPredicate;

/// A single unit of work inside a workflow definition.
///
/// Steps are identified by `id` (unique within the definition) and ordered
/// by their `dependencies` edges, not by list position. Everything beyond
/// `id`/`name`/`step_type` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_policy: Option<SkipPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HookSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UIConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolInvocation>,
}

impl Step {
    /// Minimal pass-through step with no policies attached.
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type: step_type.into(),
            dependencies: Vec::new(),
            config: Value::Null,
            retry_policy: None,
            skip_policy: None,
            hooks: None,
            ui: None,
            tools: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = Some(policy);
        self
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_ui(mut self, ui: UIConfig) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_tool(mut self, invocation: ToolInvocation) -> Self {
        self.tools.push(invocation);
        self
    }
}

/// Bounded retry of a failing step body.
///
/// `max_retries` counts retries after the first attempt, so a step runs at
/// most `max_retries + 1` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    #[serde(default)]
    pub exponential_backoff: bool,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval: default_retry_interval(),
            exponential_backoff: false,
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval: interval,
            exponential_backoff: false,
            multiplier: default_backoff_multiplier(),
        }
    }

    pub fn exponential(max_retries: u32, interval: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            retry_interval: interval,
            exponential_backoff: true,
            multiplier,
        }
    }
}

/// Predicate deciding whether a step is bypassed, plus the output
/// substituted for it when it is.
///
/// The predicate is either an expression string evaluated against a
/// projection of the context, or a native callback. Callbacks do not
/// survive serialization; only their description is exported.
#[derive(Clone)]
pub struct SkipPolicy {
    pub condition: Option<String>,
    pub predicate: Option<Arc<dyn SkipPredicate>>,
    pub default_output: Option<Value>,
}

impl SkipPolicy {
    pub fn expression(condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            predicate: None,
            default_output: None,
        }
    }

    pub fn callback(predicate: Arc<dyn SkipPredicate>) -> Self {
        Self {
            condition: None,
            predicate: Some(predicate),
            default_output: None,
        }
    }

    pub fn with_default_output(mut self, output: Value) -> Self {
        self.default_output = Some(output);
        self
    }

    /// The condition as it appears in an exported definition: the
    /// expression verbatim, or a lossy description of a native callback.
    pub fn condition_source(&self) -> Option<String> {
        match (&self.condition, &self.predicate) {
            (Some(expr), _) => Some(expr.clone()),
            (None, Some(predicate)) => Some(predicate.describe()),
            (None, None) => None,
        }
    }
}

impl std::fmt::Debug for SkipPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipPolicy")
            .field("condition", &self.condition)
            .field("predicate", &self.predicate.as_ref().map(|p| p.describe()))
            .field("default_output", &self.default_output)
            .finish()
    }
}

impl Serialize for SkipPolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut fields = 0;
        let condition = self.condition_source();
        if condition.is_some() {
            fields += 1;
        }
        if self.default_output.is_some() {
            fields += 1;
        }
        let mut state = serializer.serialize_struct("SkipPolicy", fields)?;
        if let Some(ref condition) = condition {
            state.serialize_field("condition", condition)?;
        }
        if let Some(ref output) = self.default_output {
            state.serialize_field("defaultOutput", output)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for SkipPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Declared {
            #[serde(default)]
            condition: Option<String>,
            #[serde(default)]
            default_output: Option<Value>,
        }

        let declared = Declared::deserialize(deserializer)?;
        Ok(Self {
            condition: declared.condition,
            predicate: None,
            default_output: declared.default_output,
        })
    }
}

/// Interaction mode requested from a UI component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UIMode {
    Display,
    Confirm,
    Select,
}

impl std::fmt::Display for UIMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UIMode::Display => write!(f, "display"),
            UIMode::Confirm => write!(f, "confirm"),
            UIMode::Select => write!(f, "select"),
        }
    }
}

/// Human-in-the-loop configuration attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIConfig {
    pub component_id: String,
    pub mode: UIMode,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<UIOption>,
}

/// One selectable choice in a Select interaction.
///
/// `next_step_id` is declarative routing metadata for editors; the engine
/// never consults it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

/// A tool call performed by a step body, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
