use ampac_resilience::conditions::{is_network_error, is_server_error, never};
use ampac_resilience::retry::{
    make_retryable, run_with_backoff, run_with_condition, run_with_linear_backoff, RetryPolicy,
};
use anyhow::anyhow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn no_jitter(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        backoff_factor: 2.0,
        jitter: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_uses_every_attempt() {
    for max_attempts in 1..=6 {
        let counter = AtomicU32::new(0);
        let outcome = run_with_backoff(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow!("Always fails")) }
            },
            &no_jitter(max_attempts),
        )
        .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts_used, max_attempts);
        assert_eq!(counter.load(Ordering::SeqCst), max_attempts);
        assert_eq!(outcome.error().unwrap().to_string(), "Always fails");
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_ignores_policy() {
    for policy in [no_jitter(1), no_jitter(10), RetryPolicy::default()] {
        let outcome = run_with_backoff(|| async { Ok::<_, anyhow::Error>("approved") }, &policy).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(outcome.elapsed, Duration::ZERO);
        assert_eq!(outcome.into_result().unwrap(), "approved");
    }
}

#[tokio::test(start_paused = true)]
async fn test_final_error_is_from_last_attempt() {
    let counter = AtomicU32::new(0);
    let outcome = run_with_backoff(
        || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<(), _>(anyhow!("failure #{}", attempt)) }
        },
        &no_jitter(3),
    )
    .await;

    assert_eq!(outcome.error().unwrap().to_string(), "failure #3");
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_matches_exponential_schedule() {
    // 100 + 200 + 400 + 800 + 1000 (capped)
    let outcome = run_with_backoff(
        || async { Err::<(), _>(anyhow!("down")) },
        &no_jitter(6),
    )
    .await;
    assert_eq!(outcome.elapsed, Duration::from_millis(2500));
}

#[tokio::test(start_paused = true)]
async fn test_jittered_elapsed_within_bounds() {
    let policy = RetryPolicy {
        jitter: true,
        ..no_jitter(4)
    };
    let outcome = run_with_backoff(|| async { Err::<(), _>(anyhow!("down")) }, &policy).await;

    // Nominal total is 100 + 200 + 400
    assert!(outcome.elapsed >= Duration::from_millis(350));
    assert!(outcome.elapsed <= Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_linear_backoff_constant_delay() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let outcome = run_with_linear_backoff(
        || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 3 {
                    Err(anyhow!("Simulated failure"))
                } else {
                    Ok(count)
                }
            }
        },
        5,
        Duration::from_millis(250),
    )
    .await;

    assert_eq!(outcome.value(), Some(&3));
    assert_eq!(outcome.attempts_used, 4);
    assert_eq!(outcome.elapsed, Duration::from_millis(750));
}

#[tokio::test(start_paused = true)]
async fn test_condition_false_stops_immediately() {
    let counter = AtomicU32::new(0);
    let outcome = run_with_condition(
        || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow!("permission-denied")) }
        },
        is_network_error,
        5,
        Duration::from_millis(100),
    )
    .await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.attempts_used, 1);
    assert_eq!(outcome.elapsed, Duration::ZERO);
    assert_eq!(outcome.error().unwrap().to_string(), "permission-denied");
}

#[tokio::test(start_paused = true)]
async fn test_condition_sees_attempt_numbers_and_last_error_wins() {
    let counter = AtomicU32::new(0);
    let mut seen = Vec::new();

    let outcome = run_with_condition(
        || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err::<(), _>(anyhow!("HTTP 503 on attempt {}", attempt))
                } else {
                    Err(anyhow!("HTTP 400 on attempt {}", attempt))
                }
            }
        },
        |err: &anyhow::Error, attempt: u32| {
            seen.push(attempt);
            is_server_error(err, attempt)
        },
        10,
        Duration::from_millis(10),
    )
    .await;

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(outcome.attempts_used, 3);
    assert_eq!(outcome.error().unwrap().to_string(), "HTTP 400 on attempt 3");
}

#[tokio::test(start_paused = true)]
async fn test_condition_never_retries() {
    let outcome = run_with_condition(
        || async { Err::<(), _>(anyhow!("network down")) },
        never,
        3,
        Duration::from_millis(10),
    )
    .await;
    assert_eq!(outcome.attempts_used, 1);
}

#[tokio::test(start_paused = true)]
async fn test_make_retryable_returns_value() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let fetch_rate = make_retryable(
        move |(product, term): (String, u32)| {
            let counter = counter_clone.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("connection reset"))
                } else {
                    Ok(format!("{}:{}:6.25", product, term))
                }
            }
        },
        no_jitter(3),
    );

    let rate = fetch_rate.call(("sba-7a".to_string(), 120)).await.unwrap();
    assert_eq!(rate, "sba-7a:120:6.25");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_make_retryable_propagates_final_error() {
    let submit = make_retryable(
        |id: u32| async move { Err::<(), _>(anyhow!("HTTP 502 submitting {}", id)) },
        no_jitter(2),
    );

    let err = submit.call(7).await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP 502 submitting 7");
}
