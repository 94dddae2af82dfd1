// ABOUTME: Single-step execution pipeline
// ABOUTME: Combines cancellation, skip policy, hooks, retry and output commit

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::hooks::HookManager;
use super::policies;
use super::result::StepResult;
use crate::definition::step::Step;

/// The work a step performs once per attempt. Bodies must be re-runnable
/// because the retry loop calls them again after a failure.
pub type StepBody = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation observed between attempts and during retry
/// sleeps. In-flight bodies are not pre-empted.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs one step through its full pipeline: pre-cancellation check, skip
/// policy, before-hooks, retried body, after-hooks, output commit.
pub struct StepExecutor {
    workflow_id: String,
    instance_id: String,
    events: EventBus,
    hook_manager: Arc<HookManager>,
}

impl StepExecutor {
    pub fn new(
        workflow_id: String,
        instance_id: String,
        events: EventBus,
        hook_manager: Arc<HookManager>,
    ) -> Self {
        Self {
            workflow_id,
            instance_id,
            events,
            hook_manager,
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

    fn cancelled_result(step: &Step, retry_count: u32) -> StepResult {
        Self::cancelled_result_with_reason(
            step,
            retry_count,
            format!("step '{}' cancelled", step.id),
        )
    }

    fn cancelled_result_with_reason(step: &Step, retry_count: u32, reason: String) -> StepResult {
        StepResult::failed(
            step.id.clone(),
            ExecutionError::Cancelled { reason },
            retry_count,
        )
    }

    pub async fn execute_step(
        &self,
        step: &Step,
        context: &ExecutionContext,
        body: StepBody,
        input: Value,
        cancel: &CancelFlag,
    ) -> StepResult {
        if cancel.is_cancelled() {
            return Self::cancelled_result(step, 0);
        }

        if let Some(ref skip_policy) = step.skip_policy {
            if policies::should_skip(skip_policy, context).await {
                let reason = skip_policy
                    .condition_source()
                    .unwrap_or_else(|| "skip policy matched".to_string());
                info!(step_id = %step.id, "step skipped: {}", reason);
                self.emit(EventKind::StepSkip, &step.id, json!({"reason": reason}));

                let output = skip_policy.default_output.clone().unwrap_or(Value::Null);
                context.set_step_output(step.id.clone(), output.clone()).await;
                return StepResult::skipped(step.id.clone(), Some(output));
            }
        }

        let effective_input = match self
            .hook_manager
            .execute_before(&step.id, input, context, step.hooks.as_ref())
            .await
        {
            Ok(input) => input,
            Err(e) => {
                warn!(step_id = %step.id, "before-hook chain failed: {}", e);
                self.emit(
                    EventKind::StepFailed,
                    &step.id,
                    json!({
                        "error": e.to_string(),
                        "errorName": e.name(),
                        "phase": "beforeHook",
                    }),
                );
                return StepResult::failed(step.id.clone(), e, 0);
            }
        };

        let max_retries = step.retry_policy.as_ref().map(|p| p.max_retries).unwrap_or(0);
        let mut attempt: u32 = 1;

        self.emit(EventKind::StepStart, &step.id, json!({"attempt": attempt}));

        let output = loop {
            if cancel.is_cancelled() {
                return Self::cancelled_result(step, attempt - 1);
            }

            match body(effective_input.clone()).await {
                Ok(output) => break output,
                Err(e) => {
                    if e.is_cancellation() {
                        // Keep the wait's own reason instead of synthesizing
                        // a generic one.
                        return Self::cancelled_result_with_reason(
                            step,
                            attempt - 1,
                            e.to_string(),
                        );
                    }
                    if cancel.is_cancelled() {
                        return Self::cancelled_result(step, attempt - 1);
                    }

                    let failed_attempts = attempt;
                    if failed_attempts > max_retries {
                        warn!(
                            step_id = %step.id,
                            attempts = attempt,
                            "step failed permanently: {}", e
                        );
                        self.emit(
                            EventKind::StepFailed,
                            &step.id,
                            json!({
                                "error": e.to_string(),
                                "errorName": e.name(),
                                "retryCount": attempt - 1,
                                "maxRetries": max_retries,
                            }),
                        );
                        return StepResult::failed(step.id.clone(), e, attempt - 1);
                    }

                    let delay = step
                        .retry_policy
                        .as_ref()
                        .map(|p| policies::retry_delay(p, failed_attempts))
                        .unwrap_or_default();

                    debug!(step_id = %step.id, ?delay, "sleeping before retry");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Self::cancelled_result(step, attempt - 1);
                        }
                    }

                    attempt += 1;
                    self.emit(
                        EventKind::StepRetry,
                        &step.id,
                        json!({
                            "attempt": attempt,
                            "maxRetries": max_retries,
                            "lastError": e.to_string(),
                        }),
                    );
                }
            }
        };

        let retry_count = attempt - 1;
        self.emit(
            EventKind::StepComplete,
            &step.id,
            json!({
                "output": output,
                "retryCount": retry_count,
            }),
        );

        let hook_error = self
            .hook_manager
            .execute_after(&step.id, effective_input, output.clone(), context, step.hooks.as_ref())
            .await;

        context.set_step_output(step.id.clone(), output.clone()).await;

        let mut result = StepResult::success(step.id.clone(), output, retry_count);
        result.hook_error = hook_error;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::step::{RetryPolicy, SkipPolicy};
    use crate::engine::error::HookPhase;
    use crate::engine::hooks::{Hook, HookContext};
    use crate::engine::result::StepStatus;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn executor() -> (StepExecutor, Arc<StdMutex<Vec<(EventKind, Value)>>>) {
        let events = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        events.subscribe(Arc::new(move |e| {
            seen_clone.lock().unwrap().push((e.kind, e.payload.clone()));
        }));
        let executor = StepExecutor::new(
            "wf".into(),
            "i1".into(),
            events,
            Arc::new(HookManager::new()),
        );
        (executor, seen)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("wf".into(), "i1".into())
    }

    fn passthrough() -> StepBody {
        Arc::new(|input| Box::pin(async move { Ok(input) }))
    }

    fn failing_body(times: Arc<AtomicU32>, fail_count: u32) -> StepBody {
        Arc::new(move |input| {
            let times = Arc::clone(&times);
            Box::pin(async move {
                let n = times.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_count {
                    Err(ExecutionError::StepExecution {
                        step_id: "s".into(),
                        message: format!("attempt {} failed", n),
                    })
                } else {
                    Ok(input)
                }
            })
        })
    }

    #[tokio::test]
    async fn test_passthrough_success() {
        let (executor, seen) = executor();
        let ctx = context();
        let step = Step::new("s1", "S1", "task");

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!("in"), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.output, Some(json!("in")));
        assert_eq!(result.retry_count, 0);
        assert_eq!(ctx.get_step_output("s1").await, Some(json!("in")));

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventKind::StepStart, EventKind::StepComplete]);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (executor, seen) = executor();
        let ctx = context();
        let calls = Arc::new(AtomicU32::new(0));
        let step = Step::new("s1", "S1", "task")
            .with_retry_policy(RetryPolicy::exponential(2, Duration::from_millis(10), 2.0));

        let started = Instant::now();
        let result = executor
            .execute_step(
                &step,
                &ctx,
                failing_body(Arc::clone(&calls), 2),
                json!("in"),
                &CancelFlag::new(),
            )
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 10ms + 20ms of backoff at minimum.
        assert!(started.elapsed() >= Duration::from_millis(30));

        let events = seen.lock().unwrap().clone();
        let retries: Vec<&Value> = events
            .iter()
            .filter(|(k, _)| *k == EventKind::StepRetry)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0]["attempt"], json!(2));
        assert_eq!(retries[1]["attempt"], json!(3));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (executor, seen) = executor();
        let ctx = context();
        let calls = Arc::new(AtomicU32::new(0));
        let step = Step::new("s1", "S1", "task")
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(5)));

        let result = executor
            .execute_step(
                &step,
                &ctx,
                failing_body(Arc::clone(&calls), 100),
                json!(null),
                &CancelFlag::new(),
            )
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 2);
        // max_retries + 1 total invocations.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ctx.get_step_output("s1").await.is_none());

        let events = seen.lock().unwrap().clone();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(*kind, EventKind::StepFailed);
        assert_eq!(payload["retryCount"], json!(2));
        assert_eq!(payload["maxRetries"], json!(2));
    }

    #[tokio::test]
    async fn test_no_retry_policy_fails_immediately() {
        let (executor, _) = executor();
        let ctx = context();
        let calls = Arc::new(AtomicU32::new(0));
        let step = Step::new("s1", "S1", "task");

        let result = executor
            .execute_step(
                &step,
                &ctx,
                failing_body(Arc::clone(&calls), 100),
                json!(null),
                &CancelFlag::new(),
            )
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_policy_writes_default_output() {
        let (executor, seen) = executor();
        let ctx = context();
        ctx.set_global("mode".into(), json!("fast")).await;

        let step = Step::new("s1", "S1", "task").with_skip_policy(
            SkipPolicy::expression("globals.mode == 'fast'")
                .with_default_output(json!({"skipped": true})),
        );

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!(null), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(ctx.get_step_output("s1").await, Some(json!({"skipped": true})));

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventKind::StepSkip]);
    }

    #[tokio::test]
    async fn test_skip_without_default_writes_null() {
        let (executor, _) = executor();
        let ctx = context();
        let step = Step::new("s1", "S1", "task")
            .with_skip_policy(SkipPolicy::expression("true"));

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!("ignored"), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(ctx.get_step_output("s1").await, Some(Value::Null));
    }

    struct ExplodingHook;

    #[async_trait]
    impl Hook for ExplodingHook {
        fn id(&self) -> &str {
            "exploder"
        }

        async fn run(&self, ctx: &mut HookContext) -> Result<()> {
            Err(ExecutionError::StepExecution {
                step_id: ctx.step_id.clone(),
                message: "hook exploded".into(),
            })
        }
    }

    struct RewritingHook;

    #[async_trait]
    impl Hook for RewritingHook {
        fn id(&self) -> &str {
            "rewriter"
        }

        async fn run(&self, ctx: &mut HookContext) -> Result<()> {
            ctx.step_input = json!("rewritten");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_before_hook_failure_prevents_body() {
        let (executor, seen) = executor();
        let ctx = context();
        let body_ran = Arc::new(AtomicBool::new(false));

        let ran = Arc::clone(&body_ran);
        let body: StepBody = Arc::new(move |input| {
            let ran = Arc::clone(&ran);
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                Ok(input)
            })
        });

        let hooks = crate::engine::hooks::HookSet::new().with_before(Arc::new(ExplodingHook));
        let step = Step::new("s1", "S1", "task").with_hooks(hooks);

        let result = executor
            .execute_step(&step, &ctx, body, json!(null), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(!body_ran.load(Ordering::SeqCst));
        assert!(matches!(
            result.error,
            Some(ExecutionError::HookExecution { phase: HookPhase::Before, .. })
        ));

        let events = seen.lock().unwrap().clone();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(*kind, EventKind::StepFailed);
        assert_eq!(payload["phase"], json!("beforeHook"));
    }

    #[tokio::test]
    async fn test_before_hook_modifies_body_input() {
        let (executor, _) = executor();
        let ctx = context();
        let hooks = crate::engine::hooks::HookSet::new().with_before(Arc::new(RewritingHook));
        let step = Step::new("s1", "S1", "task").with_hooks(hooks);

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!("original"), &CancelFlag::new())
            .await;

        assert_eq!(result.output, Some(json!("rewritten")));
    }

    #[tokio::test]
    async fn test_after_hook_failure_is_non_fatal() {
        let (executor, _) = executor();
        let ctx = context();
        let hooks = crate::engine::hooks::HookSet::new().with_after(Arc::new(ExplodingHook));
        let step = Step::new("s1", "S1", "task").with_hooks(hooks);

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!("in"), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert!(result.hook_error.is_some());
        assert_eq!(ctx.get_step_output("s1").await, Some(json!("in")));
    }

    #[tokio::test]
    async fn test_pre_cancelled_step() {
        let (executor, seen) = executor();
        let ctx = context();
        let step = Step::new("s1", "S1", "task");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = executor
            .execute_step(&step, &ctx, passthrough(), json!(null), &cancel)
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.as_ref().unwrap().is_cancellation());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_cancellation_reason_is_preserved() {
        let (executor, _) = executor();
        let ctx = context();
        let step = Step::new("s1", "S1", "task");

        let body: StepBody = Arc::new(|_| {
            Box::pin(async move {
                Err(ExecutionError::WaitCancelled {
                    step_id: "s1".into(),
                    reason: "operator rejected the request".into(),
                })
            })
        });

        let result = executor
            .execute_step(&step, &ctx, body, json!(null), &CancelFlag::new())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        match result.error {
            Some(ExecutionError::Cancelled { reason }) => {
                assert!(reason.contains("operator rejected the request"));
            }
            other => panic!("expected cancellation with reason, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_retry_sleep() {
        let (executor, _) = executor();
        let ctx = context();
        let calls = Arc::new(AtomicU32::new(0));
        let step = Step::new("s1", "S1", "task")
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_secs(30)));
        let cancel = CancelFlag::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = executor
            .execute_step(
                &step,
                &ctx,
                failing_body(Arc::clone(&calls), 100),
                json!(null),
                &cancel,
            )
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.as_ref().unwrap().is_cancellation());
        // The 30s retry sleep must have been interrupted.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
