// ABOUTME: Typed event stream for workflow lifecycle, progress, tool and wait activity
// ABOUTME: Provides a synchronous multi-subscriber bus with per-subscriber ordering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowComplete,
    WorkflowFailed,
    StepStart,
    StepComplete,
    StepFailed,
    StepRetry,
    StepSkip,
    ProgressUpdate,
    StepBarUpdate,
    UIRender,
    UIResponse,
    ToolInvoke,
    ToolComplete,
    ToolFailed,
    WaitStart,
    WaitTimeout,
    WaitResume,
    WaitCancel,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::WorkflowStart => "workflow.start",
            EventKind::WorkflowComplete => "workflow.complete",
            EventKind::WorkflowFailed => "workflow.failed",
            EventKind::StepStart => "step.start",
            EventKind::StepComplete => "step.complete",
            EventKind::StepFailed => "step.failed",
            EventKind::StepRetry => "step.retry",
            EventKind::StepSkip => "step.skip",
            EventKind::ProgressUpdate => "progress.update",
            EventKind::StepBarUpdate => "progress.step_bar",
            EventKind::UIRender => "ui.render",
            EventKind::UIResponse => "ui.response",
            EventKind::ToolInvoke => "tool.invoke",
            EventKind::ToolComplete => "tool.complete",
            EventKind::ToolFailed => "tool.failed",
            EventKind::WaitStart => "wait.start",
            EventKind::WaitTimeout => "wait.timeout",
            EventKind::WaitResume => "wait.resume",
            EventKind::WaitCancel => "wait.cancel",
        };
        write!(f, "{}", name)
    }
}

/// One emitted event. The payload shape depends on the kind; see the
/// constructors on [`crate::engine::WorkflowEngine`] and the progress
/// tracker for the field layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub payload: Value,
}

impl WorkflowEvent {
    pub fn new(
        kind: EventKind,
        workflow_id: String,
        instance_id: String,
        step_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            workflow_id,
            instance_id,
            step_id,
            payload,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// Synchronous publish/subscribe channel.
///
/// Emission snapshots the subscriber list, so subscribing or unsubscribing
/// from inside a handler never affects the dispatch already in flight. A
/// panicking handler is isolated and logged; later subscribers still see
/// the event.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to every event. Returns the id used to unsubscribe.
    pub fn subscribe(&self, handler: EventHandler) -> u64 {
        self.add(None, handler)
    }

    /// Subscribe to a single event kind.
    pub fn subscribe_kind(&self, kind: EventKind, handler: EventHandler) -> u64 {
        self.add(Some(kind), handler)
    }

    fn add(&self, kind: Option<EventKind>, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write().expect("event bus poisoned");
        subscribers.push(Subscriber { id, kind, handler });
        id
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write().expect("event bus poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("event bus poisoned").len()
    }

    /// Deliver an event to every matching subscriber, in subscription
    /// order, on the caller's thread.
    pub fn emit(&self, event: WorkflowEvent) {
        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.read().expect("event bus poisoned");
            subscribers
                .iter()
                .filter(|s| s.kind.is_none() || s.kind == Some(event.kind))
                .cloned()
                .collect()
        };

        for subscriber in snapshot {
            let handler = Arc::clone(&subscriber.handler);
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(
                    subscriber_id = subscriber.id,
                    event = %event.kind,
                    "event subscriber panicked; continuing dispatch"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn event(kind: EventKind) -> WorkflowEvent {
        WorkflowEvent::new(kind, "wf".into(), "i1".into(), None, json!({}))
    }

    #[test]
    fn test_delivery_order_matches_publication_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe(Arc::new(move |e| {
            seen_clone.lock().unwrap().push(e.kind);
        }));

        bus.emit(event(EventKind::WorkflowStart));
        bus.emit(event(EventKind::StepStart));
        bus.emit(event(EventKind::StepComplete));
        bus.emit(event(EventKind::WorkflowComplete));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                EventKind::WorkflowStart,
                EventKind::StepStart,
                EventKind::StepComplete,
                EventKind::WorkflowComplete,
            ]
        );
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        bus.subscribe(Arc::new(|_| panic!("bad subscriber")));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(Arc::new(move |_| {
            *seen_clone.lock().unwrap() += 1;
        }));

        bus.emit(event(EventKind::StepStart));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_kind_filter() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe_kind(
            EventKind::StepRetry,
            Arc::new(move |e| seen_clone.lock().unwrap().push(e.kind)),
        );

        bus.emit(event(EventKind::StepStart));
        bus.emit(event(EventKind::StepRetry));
        bus.emit(event(EventKind::StepComplete));

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::StepRetry]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_clone = Arc::clone(&seen);
        let id = bus.subscribe(Arc::new(move |_| {
            *seen_clone.lock().unwrap() += 1;
        }));

        bus.emit(event(EventKind::StepStart));
        assert!(bus.unsubscribe(id));
        bus.emit(event(EventKind::StepStart));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_subscribe_inside_handler_does_not_affect_in_flight_dispatch() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let bus_clone = bus.clone();
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(Arc::new(move |_| {
            let late_seen = Arc::clone(&seen_clone);
            bus_clone.subscribe(Arc::new(move |_| {
                *late_seen.lock().unwrap() += 10;
            }));
        }));

        // The freshly added subscriber must not observe the event that
        // triggered its registration.
        bus.emit(event(EventKind::StepStart));
        assert_eq!(*seen.lock().unwrap(), 0);

        bus.emit(event(EventKind::StepStart));
        assert!(*seen.lock().unwrap() >= 10);
    }
}
