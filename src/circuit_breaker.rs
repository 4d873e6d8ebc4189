//! Circuit breaker guarding a single remote operation.
//!
//! ```text
//! Closed   -> Open:     consecutive_failures >= failure_threshold
//! Open     -> HalfOpen: next call after recovery_timeout has elapsed
//! HalfOpen -> Closed:   success_threshold consecutive trial successes
//! HalfOpen -> Open:     trial call fails
//! ```
//!
//! Only one trial call is in flight while half-open; everything else fails fast
//! with [`CircuitOpenError`]. The default `success_threshold` of 1 closes the
//! circuit on the first successful trial.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

/// Returned instead of calling the protected operation while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit breaker is open, retry in {retry_in:?}")]
pub struct CircuitOpenError {
    pub retry_in: Duration,
}

/// True when `error` was produced by a short-circuited call.
pub fn is_circuit_open(error: &anyhow::Error) -> bool {
    error.downcast_ref::<CircuitOpenError>().is_some()
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
        }
    }
}

#[derive(Debug)]
struct Shared {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may go through, moving Open -> HalfOpen when the
    /// cooldown has passed.
    fn admit(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let since_failure = state
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);

                if since_failure > self.config.recovery_timeout {
                    info!("Circuit breaker half-open, admitting trial call");
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    state.trial_in_flight = true;
                    Ok(Permit::new(self, true))
                } else {
                    let retry_in = self.config.recovery_timeout.saturating_sub(since_failure);
                    debug!("Circuit breaker open, rejecting call (retry in {:?})", retry_in);
                    Err(CircuitOpenError { retry_in })
                }
            }
            CircuitState::HalfOpen if state.trial_in_flight => {
                debug!("Circuit breaker half-open with trial in flight, rejecting call");
                Err(CircuitOpenError {
                    retry_in: Duration::ZERO,
                })
            }
            CircuitState::HalfOpen => {
                state.trial_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    fn record(&self, trial: bool, success: bool) {
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        if success {
            match state.state {
                CircuitState::HalfOpen if trial => {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= self.config.success_threshold.max(1) {
                        info!(
                            "Circuit breaker closed after {} successful trial calls",
                            state.half_open_successes
                        );
                        state.state = CircuitState::Closed;
                        state.consecutive_failures = 0;
                        state.half_open_successes = 0;
                    }
                }
                CircuitState::Closed => state.consecutive_failures = 0,
                _ => {}
            }
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());

        match state.state {
            CircuitState::HalfOpen if trial => {
                warn!("Circuit breaker trial call failed, reopening");
                state.state = CircuitState::Open;
                state.half_open_successes = 0;
            }
            CircuitState::Closed
                if state.consecutive_failures >= self.config.failure_threshold.max(1) =>
            {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    state.consecutive_failures
                );
                state.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }
}

/// Admission ticket for one call. Dropping it unsettled (the caller's future
/// was cancelled) frees the half-open trial slot without recording an outcome.
struct Permit<'a> {
    shared: &'a Shared,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(shared: &'a Shared, trial: bool) -> Self {
        Self {
            shared,
            trial,
            settled: false,
        }
    }

    fn settle(mut self, success: bool) {
        self.settled = true;
        self.shared.record(self.trial, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.shared.release_trial();
        }
    }
}

/// Wraps one protected operation for its whole lifetime. Clones share state,
/// so one breaker per remote endpoint can be handed to every call site.
pub struct CircuitBreaker<F> {
    operation: Arc<F>,
    shared: Arc<Shared>,
}

impl<F> Clone for CircuitBreaker<F> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F> CircuitBreaker<F> {
    pub fn new(operation: F, config: CircuitBreakerConfig) -> Self {
        Self {
            operation: Arc::new(operation),
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BreakerState::closed()),
            }),
        }
    }

    pub fn with_defaults(operation: F) -> Self {
        Self::new(operation, CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Call the protected operation, or fail fast with [`CircuitOpenError`].
    /// Errors from the operation itself are returned unchanged.
    pub async fn execute<A, Fut, T>(&self, args: A) -> Result<T>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.shared.admit()?;
        let result = (self.operation)(args).await;
        permit.settle(result.is_ok());
        result
    }

    pub fn state(&self) -> CircuitState {
        self.shared.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.shared.lock();
        BreakerSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            half_open_successes: state.half_open_successes,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Force the breaker closed with zero failures, whatever the timers say.
    pub fn reset(&self) {
        info!("Circuit breaker reset");
        *self.shared.lock() = BreakerState::closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing() -> impl Fn(()) -> std::future::Ready<Result<()>> {
        |_| std::future::ready(Err(anyhow::anyhow!("backend unavailable")))
    }

    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.success_threshold, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_success_clears_failure_streak() {
        let fail = Arc::new(AtomicU32::new(1));
        let fail_clone = fail.clone();
        let breaker = CircuitBreaker::new(
            move |_: ()| {
                let fail = fail_clone.load(Ordering::SeqCst) == 1;
                async move {
                    if fail {
                        Err(anyhow::anyhow!("boom"))
                    } else {
                        Ok(())
                    }
                }
            },
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );

        assert!(breaker.execute(()).await.is_err());
        assert!(breaker.execute(()).await.is_err());
        assert_eq!(breaker.consecutive_failures(), 2);

        fail.store(0, Ordering::SeqCst);
        assert!(breaker.execute(()).await.is_ok());
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_reports_remaining_cooldown() {
        let breaker = CircuitBreaker::new(
            failing(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(10),
                success_threshold: 1,
            },
        );

        assert!(breaker.execute(()).await.is_err());
        tokio::time::advance(Duration::from_secs(4)).await;

        let err = breaker.execute(()).await.unwrap_err();
        let open = err.downcast_ref::<CircuitOpenError>().unwrap();
        assert_eq!(open.retry_in, Duration::from_secs(6));
        assert!(is_circuit_open(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_records_last_failure() {
        let breaker = CircuitBreaker::with_defaults(failing());
        assert!(breaker.snapshot().last_failure_at.is_none());

        assert!(breaker.execute(()).await.is_err());
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot.last_failure_at.is_some());
    }
}
