//! Ready-made `should_retry` predicates for [`run_with_condition`].
//!
//! Every predicate has the signature `fn(&anyhow::Error, u32) -> bool` so a
//! caller-supplied closure can stand in for any of them. They look only at the
//! error (rendered with its full context chain); the attempt number is ignored.
//!
//! [`run_with_condition`]: crate::retry::run_with_condition

use once_cell::sync::Lazy;
use regex::Regex;

static SERVER_ERROR_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)5\d{2}(?:\D|$)").expect("valid 5xx status pattern"));

const NETWORK_MARKERS: &[&str] = &["network", "timeout", "connection", "fetch", "unavailable"];

const TRANSIENT_BACKEND_MARKERS: &[&str] = &[
    "unavailable",
    "deadline-exceeded",
    "internal",
    "resource-exhausted",
];

fn message(error: &anyhow::Error) -> String {
    format!("{:#}", error)
}

fn contains_any(error: &anyhow::Error, markers: &[&str]) -> bool {
    let message = message(error).to_lowercase();
    markers.iter().any(|marker| message.contains(marker))
}

/// Connectivity problems: timeouts, refused or dropped connections, failed fetches.
pub fn is_network_error(error: &anyhow::Error, _attempt: u32) -> bool {
    contains_any(error, NETWORK_MARKERS)
}

/// A 5xx HTTP status embedded in the error message.
pub fn is_server_error(error: &anyhow::Error, _attempt: u32) -> bool {
    SERVER_ERROR_STATUS.is_match(&message(error))
}

/// Backend status codes that clear up on their own (`unavailable`,
/// `deadline-exceeded`, `internal`, `resource-exhausted`).
pub fn is_transient_backend_error(error: &anyhow::Error, _attempt: u32) -> bool {
    contains_any(error, TRANSIENT_BACKEND_MARKERS)
}

pub fn never(_error: &anyhow::Error, _attempt: u32) -> bool {
    false
}

pub fn always(_error: &anyhow::Error, _attempt: u32) -> bool {
    true
}

/// Retry when either predicate would.
pub fn any_of<A, B>(mut first: A, mut second: B) -> impl FnMut(&anyhow::Error, u32) -> bool
where
    A: FnMut(&anyhow::Error, u32) -> bool,
    B: FnMut(&anyhow::Error, u32) -> bool,
{
    move |error: &anyhow::Error, attempt: u32| first(error, attempt) || second(error, attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_network_errors() {
        assert!(is_network_error(&anyhow!("Network request failed"), 1));
        assert!(is_network_error(&anyhow!("Request TIMEOUT after 30s"), 1));
        assert!(is_network_error(&anyhow!("connection reset by peer"), 1));
        assert!(is_network_error(&anyhow!("Failed to fetch"), 1));
        assert!(!is_network_error(&anyhow!("permission-denied"), 1));
    }

    #[test]
    fn test_network_error_in_context_chain() {
        let err = Err::<(), _>(anyhow!("connection refused"))
            .context("loading applications")
            .unwrap_err();
        assert!(is_network_error(&err, 2));
    }

    #[test]
    fn test_server_errors() {
        assert!(is_server_error(&anyhow!("HTTP 503 Service Unavailable"), 1));
        assert!(is_server_error(&anyhow!("status 500"), 1));
        assert!(is_server_error(&anyhow!("upstream returned 599"), 1));
        assert!(!is_server_error(&anyhow!("HTTP 404 Not Found"), 1));
        assert!(!is_server_error(&anyhow!("loan 15003 not found"), 1));
    }

    #[test]
    fn test_server_error_status_glued_to_text() {
        assert!(is_server_error(&anyhow!("HTTP503"), 1));
        assert!(is_server_error(&anyhow!("E503: gateway"), 1));
        assert!(is_server_error(&anyhow!("503"), 1));
        assert!(!is_server_error(&anyhow!("E5031"), 1));
    }

    #[test]
    fn test_transient_backend_errors() {
        assert!(is_transient_backend_error(&anyhow!("firestore/unavailable"), 1));
        assert!(is_transient_backend_error(&anyhow!("DEADLINE-EXCEEDED"), 1));
        assert!(is_transient_backend_error(&anyhow!("internal error"), 1));
        assert!(is_transient_backend_error(&anyhow!("resource-exhausted: quota"), 1));
        assert!(!is_transient_backend_error(&anyhow!("not-found"), 1));
    }

    #[test]
    fn test_never_and_always() {
        let err = anyhow!("anything");
        assert!(!never(&err, 1));
        assert!(always(&err, 1));
    }

    #[test]
    fn test_any_of() {
        let mut either = any_of(is_network_error, is_server_error);
        assert!(either(&anyhow!("HTTP 502"), 1));
        assert!(either(&anyhow!("network down"), 1));
        assert!(!either(&anyhow!("invalid-argument"), 1));
    }
}
