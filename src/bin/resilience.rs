use ampac_resilience::circuit_breaker::{is_circuit_open, BreakerSnapshot, CircuitBreaker};
use ampac_resilience::conditions;
use ampac_resilience::config::{Config, DEFAULT_CONFIG_PATH};
use ampac_resilience::pagination::{FetchOutcome, Paginator};
use ampac_resilience::retry::{run_with_backoff, run_with_condition, RetryPolicy};
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilience")]
#[command(about = "Exercise retry, circuit breaker and pagination policies", long_about = None)]
struct Cli {
    /// Policy file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the backoff delay before each retry
    Schedule {
        /// Override retry.max_attempts
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Run a simulated flaky operation under the retry policy
    Retry {
        /// Number of failures before the operation succeeds
        #[arg(short, long, default_value = "2")]
        fail_times: u32,
        /// Error message the simulated operation fails with
        #[arg(short, long, default_value = "network timeout")]
        message: String,
        /// Retry only while this predicate matches, with a constant delay
        #[arg(long, value_enum)]
        condition: Option<Condition>,
    },
    /// Feed a script of outcomes through a circuit breaker
    Breaker {
        /// One character per call: 's' succeeds, 'f' fails
        script: String,
        /// Pause between calls in milliseconds
        #[arg(long, default_value = "0")]
        step_ms: u64,
    },
    /// Page through a simulated data source
    Paginate {
        /// Total number of items in the source
        #[arg(short, long, default_value = "65")]
        total: usize,
        /// Page index whose first request fails
        #[arg(long)]
        fail_page: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Condition {
    Network,
    Server,
    Backend,
    Always,
    Never,
}

impl Condition {
    fn predicate(self) -> fn(&anyhow::Error, u32) -> bool {
        match self {
            Condition::Network => conditions::is_network_error,
            Condition::Server => conditions::is_server_error,
            Condition::Backend => conditions::is_transient_backend_error,
            Condition::Always => conditions::always,
            Condition::Never => conditions::never,
        }
    }
}

#[derive(Serialize)]
struct ScheduleRow {
    attempt: u32,
    nominal_ms: u128,
    jittered_ms: u128,
}

#[derive(Serialize)]
struct RetryReport {
    success: bool,
    attempts_used: u32,
    elapsed_ms: u128,
    error: Option<String>,
}

#[derive(Serialize)]
struct BreakerStep {
    call: usize,
    invoked: bool,
    result: String,
    snapshot: BreakerSnapshot,
}

#[derive(Serialize)]
struct PageStep {
    call: usize,
    outcome: String,
    items: usize,
    has_more: bool,
    last_error: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::new(),
        None => Ok(Config::default()),
    }
}

fn emit<S: Serialize>(json: bool, rows: &[S], text: impl Fn(&S) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
    } else {
        for row in rows {
            println!("{}", text(row));
        }
    }
    Ok(())
}

fn schedule(policy: &RetryPolicy, json: bool) -> Result<()> {
    let rows: Vec<ScheduleRow> = (1..policy.max_attempts)
        .map(|attempt| {
            let nominal = policy.delay_for_attempt(attempt);
            let jittered = if policy.jitter {
                RetryPolicy::jittered(nominal)
            } else {
                nominal
            };
            ScheduleRow {
                attempt,
                nominal_ms: nominal.as_millis(),
                jittered_ms: jittered.as_millis(),
            }
        })
        .collect();

    emit(json, &rows, |row| {
        format!(
            "after attempt {:>3}: nominal {:>6}ms, jittered {:>6}ms",
            row.attempt, row.nominal_ms, row.jittered_ms
        )
    })
}

async fn retry(
    policy: &RetryPolicy,
    fail_times: u32,
    message: String,
    condition: Option<Condition>,
    json: bool,
) -> Result<()> {
    let calls = AtomicU32::new(0);
    let operation = || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let message = message.clone();
        async move {
            if call < fail_times {
                Err(anyhow!("{} (call {})", message, call + 1))
            } else {
                Ok(call + 1)
            }
        }
    };

    let outcome = match condition {
        Some(condition) => {
            run_with_condition(
                operation,
                condition.predicate(),
                policy.max_attempts,
                policy.base_delay,
            )
            .await
        }
        None => run_with_backoff(operation, policy).await,
    };

    let report = RetryReport {
        success: outcome.is_success(),
        attempts_used: outcome.attempts_used,
        elapsed_ms: outcome.elapsed.as_millis(),
        error: outcome.error().map(|err| format!("{:#}", err)),
    };
    emit(json, &[report], |report| match &report.error {
        None => format!(
            "succeeded after {} attempts in {}ms",
            report.attempts_used, report.elapsed_ms
        ),
        Some(err) => format!(
            "gave up after {} attempts in {}ms: {}",
            report.attempts_used, report.elapsed_ms, err
        ),
    })
}

async fn breaker(config: &Config, script: &str, step: Duration, json: bool) -> Result<()> {
    let invoked = Arc::new(AtomicU32::new(0));
    let invoked_clone = invoked.clone();
    let breaker = CircuitBreaker::new(
        move |succeed: bool| {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if succeed {
                    Ok(())
                } else {
                    Err(anyhow!("HTTP 503 from loan service"))
                }
            }
        },
        config.circuit_breaker.breaker_config(),
    );

    let mut steps = Vec::with_capacity(script.len());
    for (call, c) in script.chars().enumerate() {
        let succeed = match c {
            's' | 'S' => true,
            'f' | 'F' => false,
            other => bail!("unexpected '{}' in script, use 's' or 'f'", other),
        };

        let before = invoked.load(Ordering::SeqCst);
        let result = match breaker.execute(succeed).await {
            Ok(()) => "ok".to_string(),
            Err(err) if is_circuit_open(&err) => format!("rejected: {}", err),
            Err(err) => format!("failed: {}", err),
        };
        steps.push(BreakerStep {
            call: call + 1,
            invoked: invoked.load(Ordering::SeqCst) > before,
            result,
            snapshot: breaker.snapshot(),
        });

        if !step.is_zero() {
            tokio::time::sleep(step).await;
        }
    }

    emit(json, &steps, |step| {
        format!(
            "call {:>3}: {:<48} state={:?} failures={}",
            step.call, step.result, step.snapshot.state, step.snapshot.consecutive_failures
        )
    })
}

/// Item range `[start, end)` of `page` in a listing of `total` items.
fn page_bounds(page: usize, page_size: usize, total: usize) -> (usize, usize) {
    let start = page.saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    (start, end)
}

async fn paginate(config: &Config, total: usize, fail_page: Option<usize>, json: bool) -> Result<()> {
    let failed_once = Arc::new(AtomicU32::new(0));
    let fetch = move |page: usize, page_size: usize| {
        let failed_once = failed_once.clone();
        async move {
            if Some(page) == fail_page && failed_once.swap(1, Ordering::SeqCst) == 0 {
                return Err(anyhow!("network unavailable while loading page {}", page));
            }
            let (start, end) = page_bounds(page, page_size, total);
            Ok((start..end).map(|n| format!("loan-{:04}", n)).collect::<Vec<_>>())
        }
    };

    let paginator = Paginator::new(fetch, config.pagination.options());
    let mut steps = Vec::new();
    let mut record = |outcome: FetchOutcome, paginator: &Paginator<String, _>| {
        let state = paginator.snapshot();
        steps.push(PageStep {
            call: steps.len() + 1,
            outcome: format!("{:?}", outcome),
            items: state.items.len(),
            has_more: state.has_more,
            last_error: state.last_error.map(|err| err.to_string()),
        });
    };

    record(paginator.activate().await, &paginator);
    // Bounded so a misbehaving source cannot loop forever.
    for _ in 0..=total + 1 {
        if !paginator.has_more() {
            break;
        }
        record(paginator.load_more().await, &paginator);
    }
    info!("Loaded {} items", paginator.len());

    emit(json, &steps, |step| {
        format!(
            "step {:>3}: {:<50} items={:<5} has_more={}{}",
            step.call,
            step.outcome,
            step.items,
            step.has_more,
            step.last_error
                .as_ref()
                .map(|err| format!(" error={}", err))
                .unwrap_or_default()
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Schedule { attempts } => {
            let mut policy = config.retry.policy();
            if let Some(attempts) = attempts {
                policy.max_attempts = attempts;
            }
            schedule(&policy, cli.json)
        }
        Commands::Retry {
            fail_times,
            message,
            condition,
        } => retry(&config.retry.policy(), fail_times, message, condition, cli.json).await,
        Commands::Breaker { script, step_ms } => {
            breaker(&config, &script, Duration::from_millis(step_ms), cli.json).await
        }
        Commands::Paginate { total, fail_page } => paginate(&config, total, fail_page, cli.json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(0, 20, 65), (0, 20));
        assert_eq!(page_bounds(3, 20, 65), (60, 65));
        assert_eq!(page_bounds(4, 20, 65), (65, 65));
    }

    #[test]
    fn test_page_bounds_with_huge_page_size() {
        assert_eq!(page_bounds(0, usize::MAX, 65), (0, 65));
        assert_eq!(page_bounds(2, usize::MAX, 65), (65, 65));
    }
}
