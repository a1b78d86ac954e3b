use crate::errors::BatchError;
use crate::task::{SharedBatchTask, TaskContext, TaskResult};
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff without jitter: attempts within one nightly window are
/// few and not contended, so predictable delays are worth more than spread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 60_000,
        }
    }
}

/// Delay after the `attempt`-th failure (zero-based): `base * 2^attempt`,
/// capped. Strictly increasing until the cap.
pub fn delay_for_attempt_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt);
    policy
        .base_delay_ms
        .saturating_mul(factor)
        .min(policy.max_delay_ms)
}

/// Drives one task to success or retry exhaustion, with a per-attempt
/// timeout. A timed-out attempt counts as a failed attempt.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    pub policy: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

impl TaskRunner {
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            policy,
            attempt_timeout,
        }
    }

    pub async fn run(&self, task: &SharedBatchTask, context: &TaskContext) -> TaskResult {
        let name = task.name();
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(self.attempt_timeout, task.execute(context)).await {
                Ok(Ok(payload)) => {
                    tracing::info!(task = name, attempt, "task succeeded");
                    return TaskResult::success(name, attempt, started.elapsed(), payload);
                }
                Ok(Err(error)) => last_error = error.to_string(),
                Err(_) => {
                    last_error = format!(
                        "attempt timed out after {}s",
                        self.attempt_timeout.as_secs()
                    );
                }
            }

            if attempt < max_attempts {
                let delay = delay_for_attempt_ms(&self.policy, attempt - 1);
                tracing::warn!(
                    task = name,
                    attempt,
                    delay_ms = delay,
                    error = %last_error,
                    "task attempt failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        let error = BatchError::RetryExhausted {
            task: name.to_string(),
            attempts: max_attempts,
            reason: last_error,
        };
        tracing::error!(task = name, %error, "task failed, retries exhausted");
        TaskResult::failure(name, max_attempts, started.elapsed(), error.to_string())
    }
}
