// ABOUTME: Wait manager for step-scoped suspension on external signals
// ABOUTME: Handles resume, cancellation, timeout strategies and deadline extension

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::{ExecutionError, Result};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::result::{SharedStepStates, StepStatus};

/// What a suspended step is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitKind {
    UI,
    Tool,
    Signal,
}

impl std::fmt::Display for WaitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitKind::UI => write!(f, "ui"),
            WaitKind::Tool => write!(f, "tool"),
            WaitKind::Signal => write!(f, "signal"),
        }
    }
}

/// Descriptive state of an active wait, mirrored into the step's runtime
/// state while it is suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingInfo {
    pub kind: WaitKind,
    pub target_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// What the timer does when it fires.
#[derive(Debug, Clone)]
pub enum TimeoutStrategy {
    /// Reject the wait with a timeout error.
    Error,
    /// Resolve the wait with a fallback value.
    Default(Value),
    /// Emit the timeout event, re-arm the timer and keep waiting.
    Ignore,
}

struct WaitItem {
    info: WaitingInfo,
    sender: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    strategy: TimeoutStrategy,
}

/// Single-shot handle resolved by resume, cancellation or timeout.
pub struct WaitFuture {
    step_id: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl WaitFuture {
    /// Await resolution. A dropped wait manager reads as a cancellation.
    pub async fn wait(self) -> Result<Value> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::WaitCancelled {
                step_id: self.step_id,
                reason: "wait manager dropped".to_string(),
            }),
        }
    }
}

/// Turns "step is waiting for something external" into schedulable state.
///
/// Invariants: at most one active wait per step; every wait resolves
/// through exactly one of resume, cancel or timeout; map entry and timer
/// are released together on any resolution path.
#[derive(Clone)]
pub struct WaitManager {
    workflow_id: String,
    instance_id: String,
    events: EventBus,
    step_states: SharedStepStates,
    items: Arc<Mutex<HashMap<String, WaitItem>>>,
}

impl WaitManager {
    pub fn new(
        workflow_id: String,
        instance_id: String,
        events: EventBus,
        step_states: SharedStepStates,
    ) -> Self {
        Self {
            workflow_id,
            instance_id,
            events,
            step_states,
            items: Arc::new(Mutex::new(HashMap::new())),
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

    /// Begin a wait that rejects with a timeout error when the timer fires.
    pub async fn start_wait(
        &self,
        step_id: &str,
        kind: WaitKind,
        target_id: &str,
        timeout: Option<Duration>,
        data: Option<Value>,
    ) -> Result<WaitFuture> {
        self.start_wait_with_strategy(step_id, kind, target_id, timeout, data, TimeoutStrategy::Error)
            .await
    }

    /// Begin a wait with an explicit timeout strategy. The strategy is
    /// consulted inside the timer callback, so an `Ignore` wait can see
    /// multiple timeout events before its eventual resume.
    pub async fn start_wait_with_strategy(
        &self,
        step_id: &str,
        kind: WaitKind,
        target_id: &str,
        timeout: Option<Duration>,
        data: Option<Value>,
        strategy: TimeoutStrategy,
    ) -> Result<WaitFuture> {
        let info = WaitingInfo {
            kind,
            target_id: target_id.to_string(),
            start_time: Utc::now(),
            timeout,
            data,
        };

        let (sender, receiver) = oneshot::channel();
        {
            let mut items = self.items.lock().await;
            if items.contains_key(step_id) {
                return Err(ExecutionError::InvalidState {
                    message: format!("step '{}' already has an active wait", step_id),
                });
            }

            let deadline = timeout.map(|t| Instant::now() + t);
            let timer = timeout.map(|t| self.spawn_timer(step_id.to_string(), t));
            items.insert(
                step_id.to_string(),
                WaitItem {
                    info: info.clone(),
                    sender,
                    timer,
                    deadline,
                    strategy,
                },
            );
        }

        {
            let mut states = self.step_states.write().await;
            if let Some(state) = states.get_mut(step_id) {
                state.status = StepStatus::WaitingInput;
                state.waiting_for = Some(info.clone());
            }
        }

        debug!(step_id, kind = %kind, target_id, "wait started");
        self.emit(
            EventKind::WaitStart,
            step_id,
            json!({
                "type": kind,
                "targetId": target_id,
                "timeout": timeout.map(|t| t.as_millis() as u64),
            }),
        );

        Ok(WaitFuture {
            step_id: step_id.to_string(),
            receiver,
        })
    }

    fn spawn_timer(&self, step_id: String, timeout: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.fire_timeout(&step_id).await;
        })
    }

    async fn fire_timeout(&self, step_id: &str) {
        let resolution = {
            let mut items = self.items.lock().await;
            let Some(strategy) = items.get(step_id).map(|item| item.strategy.clone()) else {
                return;
            };

            match strategy {
                TimeoutStrategy::Ignore => {
                    // Re-arm with the original interval and stay waiting.
                    let item = items.get_mut(step_id).expect("item checked above");
                    let interval = item.info.timeout.unwrap_or(Duration::ZERO);
                    item.deadline = Some(Instant::now() + interval);
                    item.timer = Some(self.spawn_timer(step_id.to_string(), interval));
                    None
                }
                strategy => items.remove(step_id).map(|item| (item, strategy)),
            }
        };

        let elapsed = |info: &WaitingInfo| {
            (Utc::now() - info.start_time).num_milliseconds().max(0) as u64
        };

        match resolution {
            None => {
                // Ignore strategy: announce and keep waiting.
                let info = self.get_waiting_info(step_id).await;
                if let Some(info) = info {
                    self.emit(
                        EventKind::WaitTimeout,
                        step_id,
                        json!({
                            "type": info.kind,
                            "targetId": info.target_id,
                            "elapsedTime": elapsed(&info),
                            "ignored": true,
                        }),
                    );
                }
            }
            Some((item, strategy)) => {
                self.clear_waiting_state(step_id).await;
                self.emit(
                    EventKind::WaitTimeout,
                    step_id,
                    json!({
                        "type": item.info.kind,
                        "targetId": item.info.target_id,
                        "elapsedTime": elapsed(&item.info),
                    }),
                );

                let outcome = match strategy {
                    TimeoutStrategy::Error => Err(ExecutionError::Timeout {
                        step_id: Some(step_id.to_string()),
                        timeout: item.info.timeout.unwrap_or(Duration::ZERO),
                    }),
                    TimeoutStrategy::Default(value) => Ok(value),
                    TimeoutStrategy::Ignore => unreachable!("ignore never removes the item"),
                };

                if item.sender.send(outcome).is_err() {
                    warn!(step_id, "timeout resolution had no receiver");
                }
            }
        }
    }

    async fn clear_waiting_state(&self, step_id: &str) {
        let mut states = self.step_states.write().await;
        if let Some(state) = states.get_mut(step_id) {
            state.waiting_for = None;
        }
    }

    /// Resolve an active wait with a value. Returns false when the step
    /// has no wait registered.
    pub async fn resume_wait(&self, step_id: &str, value: Value) -> bool {
        let item = {
            let mut items = self.items.lock().await;
            items.remove(step_id)
        };

        let Some(item) = item else {
            return false;
        };
        if let Some(timer) = item.timer {
            timer.abort();
        }
        self.clear_waiting_state(step_id).await;

        self.emit(
            EventKind::WaitResume,
            step_id,
            json!({
                "type": item.info.kind,
                "targetId": item.info.target_id,
                "result": value,
            }),
        );

        if item.sender.send(Ok(value)).is_err() {
            warn!(step_id, "resume had no receiver");
        }
        true
    }

    /// Reject an active wait. Returns false when none exists.
    pub async fn cancel_wait(&self, step_id: &str, reason: &str) -> bool {
        let item = {
            let mut items = self.items.lock().await;
            items.remove(step_id)
        };

        let Some(item) = item else {
            return false;
        };
        if let Some(timer) = item.timer {
            timer.abort();
        }
        self.clear_waiting_state(step_id).await;

        self.emit(
            EventKind::WaitCancel,
            step_id,
            json!({
                "type": item.info.kind,
                "targetId": item.info.target_id,
                "reason": reason,
            }),
        );

        let _ = item.sender.send(Err(ExecutionError::WaitCancelled {
            step_id: step_id.to_string(),
            reason: reason.to_string(),
        }));
        true
    }

    pub async fn cancel_all_waits(&self, reason: &str) -> usize {
        let step_ids: Vec<String> = {
            let items = self.items.lock().await;
            items.keys().cloned().collect()
        };

        let mut cancelled = 0;
        for step_id in step_ids {
            if self.cancel_wait(&step_id, reason).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Push the absolute deadline by `extra_ms` (negative values pull it
    /// closer). A deadline at or before now fires the timeout path
    /// immediately.
    pub async fn extend_timeout(&self, step_id: &str, extra_ms: i64) -> Result<()> {
        let fire_now = {
            let mut items = self.items.lock().await;
            let item = items.get_mut(step_id).ok_or_else(|| ExecutionError::InvalidState {
                message: format!("step '{}' has no active wait", step_id),
            })?;
            let deadline = item.deadline.ok_or_else(|| ExecutionError::InvalidState {
                message: format!("wait for step '{}' has no timeout to extend", step_id),
            })?;

            let new_deadline = if extra_ms >= 0 {
                deadline + Duration::from_millis(extra_ms as u64)
            } else {
                deadline
                    .checked_sub(Duration::from_millis(extra_ms.unsigned_abs()))
                    .unwrap_or_else(Instant::now)
            };

            if let Some(timer) = item.timer.take() {
                timer.abort();
            }

            let now = Instant::now();
            if new_deadline <= now {
                true
            } else {
                item.deadline = Some(new_deadline);
                let manager = self.clone();
                let id = step_id.to_string();
                item.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(new_deadline).await;
                    manager.fire_timeout(&id).await;
                }));
                false
            }
        };

        if fire_now {
            self.fire_timeout(step_id).await;
        }
        Ok(())
    }

    pub async fn is_waiting(&self, step_id: &str) -> bool {
        let items = self.items.lock().await;
        items.contains_key(step_id)
    }

    pub async fn get_waiting_info(&self, step_id: &str) -> Option<WaitingInfo> {
        let items = self.items.lock().await;
        items.get(step_id).map(|item| item.info.clone())
    }

    /// Time left before the timer fires, or `None` for an untimed wait or
    /// an unknown step.
    pub async fn get_remaining_time(&self, step_id: &str) -> Option<Duration> {
        let items = self.items.lock().await;
        items
            .get(step_id)
            .and_then(|item| item.deadline)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn waiting_step_ids(&self) -> Vec<String> {
        let items = self.items.lock().await;
        items.keys().cloned().collect()
    }

    pub async fn waiting_count(&self) -> usize {
        let items = self.items.lock().await;
        items.len()
    }
}
