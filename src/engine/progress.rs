// ABOUTME: Progress tracking and step-bar state for external observers
// ABOUTME: Emits percentage updates and per-step status lists on every transition

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::events::{EventBus, EventKind, WorkflowEvent};
use super::result::StepStatus;
use crate::definition::step::Step;

/// One row of the external step bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBarEntry {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
}

/// Snapshot of the step bar returned by `get_step_bar_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBarState {
    pub steps: Vec<StepBarEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_step_id: Option<String>,
}

/// Mirrors step statuses for cheap synchronous reads and emits
/// `ProgressUpdate` / `StepBarUpdate` events. The mirror also follows wait
/// transitions through the event bus, so a step that suspends shows up as
/// waiting without the orchestrator's involvement.
#[derive(Clone)]
pub struct ProgressTracker {
    workflow_id: String,
    instance_id: String,
    events: EventBus,
    steps: Arc<Vec<(String, String)>>,
    statuses: Arc<RwLock<HashMap<String, StepStatus>>>,
    active: Arc<RwLock<Option<String>>>,
}

impl ProgressTracker {
    pub fn new(workflow_id: String, instance_id: String, events: EventBus, steps: &[Step]) -> Self {
        let statuses = steps
            .iter()
            .map(|s| (s.id.clone(), StepStatus::Pending))
            .collect();

        let tracker = Self {
            workflow_id,
            instance_id,
            events,
            steps: Arc::new(steps.iter().map(|s| (s.id.clone(), s.name.clone())).collect()),
            statuses: Arc::new(RwLock::new(statuses)),
            active: Arc::new(RwLock::new(None)),
        };
        tracker.attach_wait_listeners();
        tracker
    }

    fn attach_wait_listeners(&self) {
        let waiting = self.clone();
        self.events.subscribe_kind(
            EventKind::WaitStart,
            Arc::new(move |event| {
                if let Some(ref step_id) = event.step_id {
                    waiting.record_silent(step_id, StepStatus::WaitingInput);
                    waiting.emit_step_bar();
                }
            }),
        );

        let resumed = self.clone();
        self.events.subscribe_kind(
            EventKind::WaitResume,
            Arc::new(move |event| {
                if let Some(ref step_id) = event.step_id {
                    resumed.record_silent(step_id, StepStatus::Running);
                    resumed.emit_step_bar();
                }
            }),
        );
    }

    fn record_silent(&self, step_id: &str, status: StepStatus) {
        {
            let mut statuses = self.statuses.write().expect("progress tracker poisoned");
            if let Some(entry) = statuses.get_mut(step_id) {
                *entry = status;
            }
        }
        if matches!(status, StepStatus::Running | StepStatus::WaitingInput) {
            let mut active = self.active.write().expect("progress tracker poisoned");
            *active = Some(step_id.to_string());
        }
    }

    /// Record a status transition and publish the updated step bar.
    pub fn record(&self, step_id: &str, status: StepStatus) {
        self.record_silent(step_id, status);
        self.emit_step_bar();
    }

    fn emit_step_bar(&self) {
        let state = self.step_bar_state();
        self.events.emit(WorkflowEvent::new(
            EventKind::StepBarUpdate,
            self.workflow_id.clone(),
            self.instance_id.clone(),
            None,
            json!({
                "steps": state.steps,
                "activeStepId": state.active_step_id,
            }),
        ));
    }

    pub fn step_bar_state(&self) -> StepBarState {
        let statuses = self.statuses.read().expect("progress tracker poisoned");
        let active = self.active.read().expect("progress tracker poisoned");
        StepBarState {
            steps: self
                .steps
                .iter()
                .map(|(id, name)| StepBarEntry {
                    id: id.clone(),
                    name: name.clone(),
                    status: statuses.get(id).copied().unwrap_or(StepStatus::Pending),
                })
                .collect(),
            active_step_id: active.clone(),
        }
    }

    pub fn completed_count(&self) -> usize {
        let statuses = self.statuses.read().expect("progress tracker poisoned");
        statuses.values().filter(|s| s.counts_as_completed()).count()
    }

    pub fn percentage(&self) -> u64 {
        let total = self.steps.len();
        if total == 0 {
            return 100;
        }
        ((self.completed_count() as f64 / total as f64) * 100.0).round() as u64
    }

    /// Publish a `ProgressUpdate` reflecting the current completion count.
    pub fn emit_progress(&self, current_step: Option<&str>) {
        self.events.emit(WorkflowEvent::new(
            EventKind::ProgressUpdate,
            self.workflow_id.clone(),
            self.instance_id.clone(),
            current_step.map(|s| s.to_string()),
            json!({
                "currentStep": current_step,
                "totalSteps": self.steps.len(),
                "completedSteps": self.completed_count(),
                "percentage": self.percentage(),
            }),
        ));
    }
}
