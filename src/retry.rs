use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Nominal (un-jittered) delay after the `attempt`-th failure.
    ///
    /// `min(max_delay, base_delay * backoff_factor^(attempt - 1))`, saturating at
    /// `max_delay` however large `attempt` gets.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let nominal_nanos = self.base_delay.as_nanos() as f64 * factor;

        if !nominal_nanos.is_finite() || nominal_nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nominal_nanos.round() as u64)
    }

    /// Scale `nominal` by a uniform random factor in `[0.5, 1.0]`.
    pub fn jittered(nominal: Duration) -> Duration {
        let factor = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_nanos((nominal.as_nanos() as f64 * factor).round() as u64)
    }

    /// Delay actually slept after the `attempt`-th failure.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let nominal = self.delay_for_attempt(attempt);
        if self.jitter {
            Self::jittered(nominal)
        } else {
            nominal
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub async fn run<F, Fut, T>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        run_with_backoff(operation, self).await
    }
}

/// Result of one retry session.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The value on success, or the error of the final attempt.
    pub result: Result<T>,
    pub attempts_used: u32,
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is exhausted,
/// sleeping with exponential backoff in between.
pub async fn run_with_backoff<F, Fut, T>(mut operation: F, policy: &RetryPolicy) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded after {} attempts", attempt);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts_used: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(err) if attempt >= max_attempts => {
                warn!("Operation failed after {} attempts: {}", attempt, err);
                return RetryOutcome {
                    result: Err(err),
                    attempts_used: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(err) => {
                let delay = policy.next_delay(attempt);
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Same as [`run_with_backoff`] but waits a constant `delay` between attempts.
pub async fn run_with_linear_backoff<F, Fut, T>(
    operation: F,
    max_attempts: u32,
    delay: Duration,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_with_condition(operation, |_: &anyhow::Error, _: u32| true, max_attempts, delay).await
}

/// Retry with a constant `delay` for as long as `should_retry(error, attempt)`
/// agrees and attempts remain. The returned error is always the last one seen.
pub async fn run_with_condition<F, Fut, T, P>(
    mut operation: F,
    mut should_retry: P,
    max_attempts: u32,
    delay: Duration,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&anyhow::Error, u32) -> bool,
{
    let start = Instant::now();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded after {} attempts", attempt);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts_used: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(err) => {
                if attempt >= max_attempts || !should_retry(&err, attempt) {
                    warn!("Operation failed after {} attempts: {}", attempt, err);
                    return RetryOutcome {
                        result: Err(err),
                        attempts_used: attempt,
                        elapsed: start.elapsed(),
                    };
                }
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Wrap `f` so every call runs under `policy` and surfaces the final error as
/// an `Err` instead of a [`RetryOutcome`].
pub fn make_retryable<F>(f: F, policy: RetryPolicy) -> Retryable<F> {
    Retryable { f, policy }
}

#[derive(Debug, Clone)]
pub struct Retryable<F> {
    f: F,
    policy: RetryPolicy,
}

impl<F> Retryable<F> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call the wrapped function with `args`, cloned for every attempt.
    pub async fn call<A, Fut, T>(&self, args: A) -> Result<T>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = Result<T>>,
    {
        run_with_backoff(|| (self.f)(args.clone()), &self.policy)
            .await
            .into_result()
    }
}
