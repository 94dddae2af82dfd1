// ABOUTME: Execution context for per-instance workflow data flow
// ABOUTME: Holds step outputs and global values with snapshot/restore support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Structural copy of both context namespaces. Mutating a snapshot never
/// touches the live context it was taken from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub step_outputs: HashMap<String, Value>,
    pub globals: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct ContextState {
    step_outputs: HashMap<String, Value>,
    globals: HashMap<String, Value>,
}

/// Per-instance key-value store with two disjoint namespaces: outputs
/// committed by steps, and globals written by tools and hooks.
///
/// Clones share the same underlying state; separate instances created via
/// [`ExecutionContext::new`] share nothing. Individual reads and writes are
/// atomic; the context survives workflow termination for inspection.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    state: Arc<RwLock<ContextState>>,
}

impl ExecutionContext {
    pub fn new(workflow_id: String, instance_id: String) -> Self {
        Self {
            workflow_id,
            instance_id,
            created_at: Utc::now(),
            state: Arc::new(RwLock::new(ContextState::default())),
        }
    }

    pub async fn get_step_output(&self, step_id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.step_outputs.get(step_id).cloned()
    }

    pub async fn set_step_output(&self, step_id: String, output: Value) {
        let mut state = self.state.write().await;
        state.step_outputs.insert(step_id, output);
    }

    pub async fn has_step_output(&self, step_id: &str) -> bool {
        let state = self.state.read().await;
        state.step_outputs.contains_key(step_id)
    }

    pub async fn get_global(&self, key: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.globals.get(key).cloned()
    }

    pub async fn set_global(&self, key: String, value: Value) {
        let mut state = self.state.write().await;
        state.globals.insert(key, value);
    }

    pub async fn has_global(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state.globals.contains_key(key)
    }

    pub async fn all_step_outputs(&self) -> HashMap<String, Value> {
        let state = self.state.read().await;
        state.step_outputs.clone()
    }

    pub async fn all_globals(&self) -> HashMap<String, Value> {
        let state = self.state.read().await;
        state.globals.clone()
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        let state = self.state.read().await;
        ContextSnapshot {
            step_outputs: state.step_outputs.clone(),
            globals: state.globals.clone(),
        }
    }

    /// Replace both namespaces wholesale with the snapshot's contents.
    pub async fn restore(&self, snapshot: ContextSnapshot) {
        let mut state = self.state.write().await;
        state.step_outputs = snapshot.step_outputs;
        state.globals = snapshot.globals;
    }

    // Administrative operations; normal execution never calls these.

    pub async fn clear_step_outputs(&self) {
        let mut state = self.state.write().await;
        state.step_outputs.clear();
    }

    pub async fn clear_globals(&self) {
        let mut state = self.state.write().await;
        state.globals.clear();
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.step_outputs.clear();
        state.globals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new("wf".to_string(), "instance-1".to_string())
    }

    #[tokio::test]
    async fn test_namespaces_are_disjoint() {
        let ctx = context();
        ctx.set_step_output("build".to_string(), json!("artifact")).await;
        ctx.set_global("build".to_string(), json!(42)).await;

        assert_eq!(ctx.get_step_output("build").await, Some(json!("artifact")));
        assert_eq!(ctx.get_global("build").await, Some(json!(42)));
        assert!(!ctx.has_global("artifact").await);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let ctx = context();
        ctx.set_global("key".to_string(), json!("before")).await;

        let mut snapshot = ctx.snapshot().await;
        snapshot.globals.insert("key".to_string(), json!("mutated"));

        assert_eq!(ctx.get_global("key").await, Some(json!("before")));
    }

    #[tokio::test]
    async fn test_restore_replaces_wholesale() {
        let ctx = context();
        ctx.set_global("stale".to_string(), json!(1)).await;
        ctx.set_step_output("old".to_string(), json!(2)).await;

        let mut snapshot = ContextSnapshot::default();
        snapshot.globals.insert("fresh".to_string(), json!(3));
        ctx.restore(snapshot).await;

        assert!(!ctx.has_global("stale").await);
        assert!(!ctx.has_step_output("old").await);
        assert_eq!(ctx.get_global("fresh").await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_instances_share_nothing() {
        let a = ExecutionContext::new("wf".to_string(), "a".to_string());
        let b = ExecutionContext::new("wf".to_string(), "b".to_string());

        let before = b.snapshot().await;
        a.set_global("shared?".to_string(), json!(true)).await;
        let after = b.snapshot().await;

        assert_eq!(before.globals.len(), after.globals.len());
        assert!(b.get_global("shared?").await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let ctx = context();
        let clone = ctx.clone();
        clone.set_step_output("s".to_string(), json!("out")).await;

        assert_eq!(ctx.get_step_output("s").await, Some(json!("out")));
    }
}
