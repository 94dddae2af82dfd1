// ABOUTME: Retry timing and skip decision logic
// ABOUTME: Computes backoff delays and evaluates skip policies against the context

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::condition;
use super::context::ExecutionContext;
use crate::definition::step::{RetryPolicy, SkipPolicy};

/// Native skip decision attached to a step's skip policy.
#[async_trait]
pub trait SkipPredicate: Send + Sync {
    async fn should_skip(&self, context: &ExecutionContext) -> bool;

    /// Lossy source representation used when a definition is exported.
    fn describe(&self) -> String {
        "<native predicate>".to_string()
    }
}

/// Delay before the next attempt, given how many attempts have already
/// failed (at least 1). With exponential backoff the k-th failure waits
/// `base * multiplier^(k-1)`; otherwise every wait is the base interval.
pub fn retry_delay(policy: &RetryPolicy, failed_attempts: u32) -> Duration {
    if !policy.exponential_backoff || failed_attempts <= 1 {
        return policy.retry_interval;
    }
    let factor = policy.multiplier.powi(failed_attempts as i32 - 1);
    let millis = (policy.retry_interval.as_millis() as f64 * factor) as u64;
    Duration::from_millis(millis)
}

/// Evaluate a skip policy against the live context. A native predicate
/// takes priority over an expression string; an expression that fails to
/// parse or evaluate logs a warning and means "do not skip".
pub async fn should_skip(policy: &SkipPolicy, context: &ExecutionContext) -> bool {
    if let Some(ref predicate) = policy.predicate {
        return predicate.should_skip(context).await;
    }

    if let Some(ref expr) = policy.condition {
        let snapshot = context.snapshot().await;
        match condition::evaluate_str(expr, &snapshot) {
            Ok(result) => return result,
            Err(e) => {
                warn!(condition = expr, "skip condition failed to evaluate ({}); not skipping", e);
                return false;
            }
        }
    }

    false
}
