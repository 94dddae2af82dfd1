// ABOUTME: Before/after hook pipeline for step execution
// ABOUTME: Ordered callback chains with input mutation and per-phase failure policy

use async_trait::async_trait;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::warn;

use super::context::ExecutionContext;
use super::error::{ExecutionError, HookPhase, Result};

/// Mutable view handed to each hook in the chain.
///
/// Before-hooks may replace `step_input`; the change is visible to the rest
/// of the chain and to the step body. `step_output` is populated only in
/// the after phase.
pub struct HookContext {
    pub step_id: String,
    pub step_input: Value,
    pub step_output: Option<Value>,
    pub context: ExecutionContext,
}

/// A lifecycle callback attached globally or to a single step.
#[async_trait]
pub trait Hook: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    /// Lossy source representation used when a definition is exported.
    fn describe(&self) -> String {
        "<native hook>".to_string()
    }

    async fn run(&self, ctx: &mut HookContext) -> Result<()>;
}

/// Placeholder for a hook imported from JSON; keeps identity, does nothing
/// until the caller re-binds a real implementation.
#[derive(Debug, Clone)]
pub struct InertHook {
    id: String,
    name: String,
}

impl InertHook {
    pub fn new(id: String, name: String) -> Self {
        Self { id, name }
    }
}

#[async_trait]
impl Hook for InertHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        "<imported hook>".to_string()
    }

    async fn run(&self, _ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }
}

/// Ordered before/after hook lists attached to a step or a definition.
#[derive(Clone, Default)]
pub struct HookSet {
    pub before: Vec<Arc<dyn Hook>>,
    pub after: Vec<Arc<dyn Hook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, hook: Arc<dyn Hook>) -> Self {
        self.before.push(hook);
        self
    }

    pub fn with_after(mut self, hook: Arc<dyn Hook>) -> Self {
        self.after.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("before", &self.before.iter().map(|h| h.id()).collect::<Vec<_>>())
            .field("after", &self.after.iter().map(|h| h.id()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeclaredHook {
    id: String,
    name: String,
    #[serde(default)]
    source: Option<String>,
}

impl Serialize for HookSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let declare = |hooks: &[Arc<dyn Hook>]| -> Vec<DeclaredHook> {
            hooks
                .iter()
                .map(|h| DeclaredHook {
                    id: h.id().to_string(),
                    name: h.name().to_string(),
                    source: Some(h.describe()),
                })
                .collect()
        };

        let mut state = serializer.serialize_struct("HookSet", 2)?;
        state.serialize_field("before", &declare(&self.before))?;
        state.serialize_field("after", &declare(&self.after))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for HookSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Declared {
            #[serde(default)]
            before: Vec<DeclaredHook>,
            #[serde(default)]
            after: Vec<DeclaredHook>,
        }

        let declared = Declared::deserialize(deserializer)?;
        let inert = |hooks: Vec<DeclaredHook>| -> Vec<Arc<dyn Hook>> {
            hooks
                .into_iter()
                .map(|h| Arc::new(InertHook::new(h.id, h.name)) as Arc<dyn Hook>)
                .collect()
        };

        Ok(Self {
            before: inert(declared.before),
            after: inert(declared.after),
        })
    }
}

/// Engine-scoped registry of global hooks plus the chain execution logic.
///
/// Global hooks run around every step: global-before hooks precede
/// step-scoped before hooks, and global-after hooks follow step-scoped
/// after hooks. Re-adding an id already present is silently ignored.
pub struct HookManager {
    global_before: RwLock<Vec<Arc<dyn Hook>>>,
    global_after: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            global_before: RwLock::new(Vec::new()),
            global_after: RwLock::new(Vec::new()),
        }
    }

    pub fn add_global_hook(&self, phase: HookPhase, hook: Arc<dyn Hook>) {
        let list = match phase {
            HookPhase::Before => &self.global_before,
            HookPhase::After => &self.global_after,
        };
        let mut hooks = list.write().expect("hook manager poisoned");
        if hooks.iter().any(|h| h.id() == hook.id()) {
            return;
        }
        hooks.push(hook);
    }

    pub fn remove_global_hook(&self, phase: HookPhase, hook_id: &str) -> bool {
        let list = match phase {
            HookPhase::Before => &self.global_before,
            HookPhase::After => &self.global_after,
        };
        let mut hooks = list.write().expect("hook manager poisoned");
        let before = hooks.len();
        hooks.retain(|h| h.id() != hook_id);
        hooks.len() != before
    }

    pub fn global_hook_ids(&self, phase: HookPhase) -> Vec<String> {
        let list = match phase {
            HookPhase::Before => &self.global_before,
            HookPhase::After => &self.global_after,
        };
        list.read()
            .expect("hook manager poisoned")
            .iter()
            .map(|h| h.id().to_string())
            .collect()
    }

    fn snapshot(&self, phase: HookPhase) -> Vec<Arc<dyn Hook>> {
        let list = match phase {
            HookPhase::Before => &self.global_before,
            HookPhase::After => &self.global_after,
        };
        list.read().expect("hook manager poisoned").clone()
    }

    /// Run `global-before ++ step-before` in order. The first failure
    /// aborts the chain; the step body must not run afterwards. Returns
    /// the possibly-modified input on success.
    pub async fn execute_before(
        &self,
        step_id: &str,
        input: Value,
        context: &ExecutionContext,
        step_hooks: Option<&HookSet>,
    ) -> Result<Value> {
        let mut chain = self.snapshot(HookPhase::Before);
        if let Some(hooks) = step_hooks {
            chain.extend(hooks.before.iter().cloned());
        }

        let mut hook_ctx = HookContext {
            step_id: step_id.to_string(),
            step_input: input,
            step_output: None,
            context: context.clone(),
        };

        for hook in chain {
            if let Err(e) = hook.run(&mut hook_ctx).await {
                return Err(ExecutionError::HookExecution {
                    hook_id: hook.id().to_string(),
                    phase: HookPhase::Before,
                    step_id: step_id.to_string(),
                    message: e.to_string(),
                });
            }
        }

        Ok(hook_ctx.step_input)
    }

    /// Run `step-after ++ global-after` in order. Failures never abort the
    /// chain or change the step result; the first one is returned as a
    /// warning-level error.
    pub async fn execute_after(
        &self,
        step_id: &str,
        input: Value,
        output: Value,
        context: &ExecutionContext,
        step_hooks: Option<&HookSet>,
    ) -> Option<ExecutionError> {
        let mut chain: Vec<Arc<dyn Hook>> = step_hooks
            .map(|hooks| hooks.after.clone())
            .unwrap_or_default();
        chain.extend(self.snapshot(HookPhase::After));

        let mut hook_ctx = HookContext {
            step_id: step_id.to_string(),
            step_input: input,
            step_output: Some(output),
            context: context.clone(),
        };

        let mut first_error = None;
        for hook in chain {
            if let Err(e) = hook.run(&mut hook_ctx).await {
                let error = ExecutionError::HookExecution {
                    hook_id: hook.id().to_string(),
                    phase: HookPhase::After,
                    step_id: step_id.to_string(),
                    message: e.to_string(),
                };
                warn!(step_id, hook_id = hook.id(), "after-hook failed: {}", error);
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        first_error
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}
