// ABOUTME: UI component registry and human interaction handling
// ABOUTME: Implements display/confirm/select flows with auto-advance and response matching

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::wait::{WaitKind, WaitManager};
use crate::definition::step::{UIConfig, UIMode};

pub const DEFAULT_DISPLAY_TIMEOUT: Duration = Duration::from_millis(3000);

const INVALID_OPTION_REASON: &str = "invalid option";
const CANCELLED_REASON: &str = "UI interaction cancelled";

/// Declarative description of a registered UI component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIComponentMeta {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub supported_modes: Vec<UIMode>,
}

impl UIComponentMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>, modes: Vec<UIMode>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            supported_modes: modes,
        }
    }
}

/// What a renderer reports back. For display interactions the renderer's
/// return is the step's response; for confirm/select it only signals that
/// rendering happened and the real response arrives via `respond_to_ui`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIRenderResult {
    pub rendered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
}

#[async_trait]
pub trait UIRenderer: Send + Sync {
    async fn render(&self, config: &UIConfig, context: &ExecutionContext) -> Result<UIRenderResult>;
}

#[derive(Clone)]
pub struct UIRegistration {
    pub meta: UIComponentMeta,
    pub renderer: Arc<dyn UIRenderer>,
}

/// Name-indexed catalog of UI components. Duplicate registration fails.
pub struct UIRegistry {
    components: RwLock<HashMap<String, UIRegistration>>,
}

impl UIRegistry {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, meta: UIComponentMeta, renderer: Arc<dyn UIRenderer>) -> Result<()> {
        let mut components = self.components.write().expect("ui registry poisoned");
        if components.contains_key(&meta.id) {
            return Err(ExecutionError::DuplicateRegistration { id: meta.id });
        }
        let id = meta.id.clone();
        components.insert(id, UIRegistration { meta, renderer });
        Ok(())
    }

    pub fn unregister(&self, component_id: &str) -> bool {
        let mut components = self.components.write().expect("ui registry poisoned");
        components.remove(component_id).is_some()
    }

    pub fn get(&self, component_id: &str) -> Result<UIRegistration> {
        let components = self.components.read().expect("ui registry poisoned");
        components
            .get(component_id)
            .cloned()
            .ok_or_else(|| ExecutionError::UIComponentNotFound {
                component_id: component_id.to_string(),
            })
    }

    pub fn has(&self, component_id: &str) -> bool {
        let components = self.components.read().expect("ui registry poisoned");
        components.contains_key(component_id)
    }

    pub fn get_all(&self) -> Vec<UIComponentMeta> {
        let components = self.components.read().expect("ui registry poisoned");
        components.values().map(|r| r.meta.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.components.read().expect("ui registry poisoned").len()
    }

    pub fn clear(&self) {
        self.components.write().expect("ui registry poisoned").clear();
    }
}

impl Default for UIRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct PendingInteraction {
    component_id: String,
    option_ids: Option<Vec<String>>,
}

/// Drives the human-in-the-loop part of a step body.
#[derive(Clone)]
pub struct UIInteractionHandler {
    workflow_id: String,
    instance_id: String,
    registry: Arc<UIRegistry>,
    events: EventBus,
    wait_manager: WaitManager,
    default_display_timeout: Duration,
    pending: Arc<Mutex<HashMap<String, PendingInteraction>>>,
}

impl UIInteractionHandler {
    pub fn new(
        workflow_id: String,
        instance_id: String,
        registry: Arc<UIRegistry>,
        events: EventBus,
        wait_manager: WaitManager,
        default_display_timeout: Duration,
    ) -> Self {
        Self {
            workflow_id,
            instance_id,
            registry,
            events,
            wait_manager,
            default_display_timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn emit(&self, kind: EventKind, step_id: &str, payload: Value) {
        self.events.emit(WorkflowEvent::new(
            kind,
            self.workflow_id.clone(),
            self.instance_id.clone(),
            Some(step_id.to_string()),
            payload,
        ));
    }

    fn render_payload(config: &UIConfig) -> Value {
        let mut payload = json!({
            "componentId": config.component_id,
            "mode": config.mode,
        });
        if !config.data.is_null() {
            payload["data"] = config.data.clone();
        }
        if let Some(timeout) = config.timeout {
            payload["timeout"] = json!(timeout.as_millis() as u64);
        }
        if !config.options.is_empty() {
            payload["options"] = serde_json::to_value(&config.options).unwrap_or(Value::Null);
        }
        payload
    }

    /// Run one interaction to completion. The returned value becomes the
    /// step output.
    pub async fn handle_ui(
        &self,
        step_id: &str,
        config: &UIConfig,
        context: &ExecutionContext,
    ) -> Result<Value> {
        let registration = self.registry.get(&config.component_id)?;

        if !registration.meta.supported_modes.contains(&config.mode) {
            return Err(ExecutionError::InvalidState {
                message: format!(
                    "component '{}' does not support mode '{}'",
                    config.component_id, config.mode
                ),
            });
        }

        match config.mode {
            UIMode::Display => self.handle_display(step_id, config, context, &registration).await,
            UIMode::Confirm => {
                self.handle_interactive(step_id, config, context, &registration, None)
                    .await
            }
            UIMode::Select => {
                if config.options.is_empty() {
                    return Err(ExecutionError::InvalidState {
                        message: format!("select interaction for step '{}' has no options", step_id),
                    });
                }
                let option_ids = config.options.iter().map(|o| o.id.clone()).collect();
                self.handle_interactive(step_id, config, context, &registration, Some(option_ids))
                    .await
            }
        }
    }

    async fn handle_display(
        &self,
        step_id: &str,
        config: &UIConfig,
        context: &ExecutionContext,
        registration: &UIRegistration,
    ) -> Result<Value> {
        self.emit(EventKind::UIRender, step_id, Self::render_payload(config));

        // Rendering is best-effort for display-only interactions.
        let rendered = match registration.renderer.render(config, context).await {
            Ok(result) => result,
            Err(e) => {
                warn!(step_id, component_id = %config.component_id, "renderer failed: {}", e);
                UIRenderResult::default()
            }
        };

        let timeout = config.timeout.unwrap_or(self.default_display_timeout);
        tokio::time::sleep(timeout).await;

        self.emit(
            EventKind::UIResponse,
            step_id,
            json!({
                "response": rendered.user_response,
                "autoCompleted": true,
            }),
        );

        Ok(json!({
            "response": rendered.user_response,
            "autoCompleted": true,
        }))
    }

    async fn handle_interactive(
        &self,
        step_id: &str,
        config: &UIConfig,
        context: &ExecutionContext,
        registration: &UIRegistration,
        option_ids: Option<Vec<String>>,
    ) -> Result<Value> {
        self.emit(EventKind::UIRender, step_id, Self::render_payload(config));

        if let Err(e) = registration.renderer.render(config, context).await {
            warn!(step_id, component_id = %config.component_id, "renderer failed: {}", e);
        }

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                step_id.to_string(),
                PendingInteraction {
                    component_id: config.component_id.clone(),
                    option_ids,
                },
            );
        }

        // A zero timeout means "wait indefinitely".
        let timeout = config.timeout.filter(|t| !t.is_zero());
        let future = self
            .wait_manager
            .start_wait(
                step_id,
                WaitKind::UI,
                &config.component_id,
                timeout,
                Some(Self::render_payload(config)),
            )
            .await;

        let outcome = match future {
            Ok(future) => future.wait().await,
            Err(e) => Err(e),
        };

        {
            let mut pending = self.pending.lock().await;
            pending.remove(step_id);
        }

        match outcome {
            Ok(value) => {
                let response: UIRenderResult =
                    serde_json::from_value(value).unwrap_or_default();
                debug!(step_id, "interaction resolved");
                Ok(json!({
                    "response": response.user_response,
                    "selectedOption": response.selected_option,
                    "autoCompleted": false,
                }))
            }
            Err(ExecutionError::Timeout { step_id: err_step, timeout }) => {
                self.emit(EventKind::UIResponse, step_id, json!({"timeout": true}));
                Err(ExecutionError::Timeout {
                    step_id: err_step,
                    timeout,
                })
            }
            Err(ExecutionError::WaitCancelled { reason, .. })
                if reason == INVALID_OPTION_REASON =>
            {
                Err(ExecutionError::StepExecution {
                    step_id: step_id.to_string(),
                    message: INVALID_OPTION_REASON.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// External resolution of a pending confirm/select interaction.
    pub async fn respond_to_ui(&self, step_id: &str, response: UIRenderResult) -> Result<()> {
        let valid_option = {
            let pending = self.pending.lock().await;
            let interaction = pending.get(step_id).ok_or_else(|| ExecutionError::InvalidState {
                message: format!("no pending interaction for step '{}'", step_id),
            })?;

            match (&interaction.option_ids, &response.selected_option) {
                (Some(ids), Some(selected)) => ids.contains(selected),
                (Some(_), None) => false,
                (None, _) => true,
            }
        };

        if !valid_option {
            self.wait_manager.cancel_wait(step_id, INVALID_OPTION_REASON).await;
            return Err(ExecutionError::StepExecution {
                step_id: step_id.to_string(),
                message: INVALID_OPTION_REASON.to_string(),
            });
        }

        self.emit(
            EventKind::UIResponse,
            step_id,
            json!({
                "response": response.user_response,
                "selectedOption": response.selected_option,
            }),
        );

        let value = serde_json::to_value(&response).unwrap_or(Value::Null);
        if self.wait_manager.resume_wait(step_id, value).await {
            Ok(())
        } else {
            Err(ExecutionError::InvalidState {
                message: format!("no pending wait for step '{}'", step_id),
            })
        }
    }

    /// Reject a pending interaction, failing the waiting step.
    pub async fn cancel_pending_interaction(&self, step_id: &str) -> bool {
        let exists = {
            let pending = self.pending.lock().await;
            pending.contains_key(step_id)
        };
        if !exists {
            return false;
        }

        self.emit(EventKind::UIResponse, step_id, json!({"cancelled": true}));
        self.wait_manager.cancel_wait(step_id, CANCELLED_REASON).await
    }

    pub async fn pending_step_ids(&self) -> Vec<String> {
        let pending = self.pending.lock().await;
        pending.keys().cloned().collect()
    }
}
