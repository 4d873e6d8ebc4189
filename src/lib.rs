//! # ampac-resilience
//!
//! Client-side resilience for the AmPac loan apps: retrying remote calls with
//! backoff, circuit breaking a failing dependency, and driving paginated list
//! loads that survive overlapping triggers and torn-down views.
//!
//! ## Retry with backoff
//!
//! ```no_run
//! use ampac_resilience::retry::{run_with_backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn fetch_application(id: &str) -> anyhow::Result<String> { Ok(id.to_string()) }
//! # async fn example() -> anyhow::Result<()> {
//! let policy = RetryPolicy {
//!     max_attempts: 5,
//!     base_delay: Duration::from_millis(200),
//!     ..Default::default()
//! };
//!
//! let outcome = run_with_backoff(|| fetch_application("app-42"), &policy).await;
//! println!("{} attempts in {:?}", outcome.attempts_used, outcome.elapsed);
//! let application = outcome.into_result()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Circuit breaker
//!
//! ```no_run
//! use ampac_resilience::circuit_breaker::{is_circuit_open, CircuitBreaker};
//!
//! # async fn submit_payment(amount: u64) -> anyhow::Result<String> { Ok(amount.to_string()) }
//! # async fn example() {
//! let payments = CircuitBreaker::with_defaults(submit_payment);
//!
//! match payments.execute(12_500).await {
//!     Ok(receipt) => println!("paid: {receipt}"),
//!     Err(err) if is_circuit_open(&err) => println!("payments paused: {err}"),
//!     Err(err) => println!("payment failed: {err:#}"),
//! }
//! # }
//! ```
//!
//! ## Pagination
//!
//! ```no_run
//! use ampac_resilience::pagination::{PaginationOptions, Paginator};
//! use ampac_resilience::scroll::ScrollMetrics;
//!
//! # async fn list_loans(page: usize, size: usize) -> anyhow::Result<Vec<String>> { Ok(vec![]) }
//! # async fn example() {
//! let loans = Paginator::start(list_loans, PaginationOptions::default()).await;
//!
//! // Called from the list view's scroll handler
//! loans.on_scroll(ScrollMetrics::new(800.0, 3900.0, 5000.0)).await;
//!
//! let state = loans.snapshot();
//! println!("{} loans, more: {}", state.items.len(), state.has_more);
//! # }
//! ```

pub mod circuit_breaker;
pub mod conditions;
pub mod config;
pub mod pagination;
pub mod retry;
pub mod scroll;

// Re-export commonly used types at the crate root
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use config::Config;
pub use pagination::{FetchOutcome, PaginationOptions, PaginationState, Paginator};
pub use retry::{
    make_retryable, run_with_backoff, run_with_condition, run_with_linear_backoff, RetryOutcome,
    RetryPolicy,
};
pub use scroll::{ScrollMetrics, ScrollTrigger};
