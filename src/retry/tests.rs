//! Tests for the retry policy

use super::*;
use crate::error::{Error, TransportError, ValidationError};
use std::time::Duration;
use test_case::test_case;

fn no_jitter(base_ms: u64, max_ms: u64, attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        RetryConfig::new()
            .backoff(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
            .jitter(0.0)
            .max_attempts(attempts),
    )
}

#[test]
fn test_retry_config_default() {
    let config = RetryConfig::default();
    assert_eq!(config.base_delay_ms, 100);
    assert_eq!(config.max_delay_ms, 10_000);
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.retry_statuses, vec![429, 500, 502, 503, 504]);
    assert_eq!(RetryConfig::no_retries().max_attempts, 1);
}

#[test_case(1, 100 ; "first retry uses base delay")]
#[test_case(2, 200 ; "second doubles")]
#[test_case(3, 400 ; "third")]
#[test_case(4, 800 ; "fourth")]
#[test_case(5, 1600 ; "fifth")]
#[test_case(6, 2000 ; "sixth is capped")]
#[test_case(40, 2000 ; "huge exponent saturates to cap")]
fn test_delay_sequence(attempt: u32, expected_ms: u64) {
    let policy = no_jitter(100, 2_000, 100);
    let err = Error::from(TransportError::connect("refused"));

    assert_eq!(
        policy.should_retry(attempt, &err),
        Some(Duration::from_millis(expected_ms))
    );
}

#[test]
fn test_jitter_stays_within_bounds() {
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .backoff(Duration::from_millis(1_000), Duration::from_secs(60))
            .jitter(0.25)
            .max_attempts(10),
    );

    for _ in 0..200 {
        let delay = policy.backoff(1);
        assert!(delay >= Duration::from_millis(750), "{delay:?}");
        assert!(delay <= Duration::from_millis(1_250), "{delay:?}");
    }
}

#[test]
fn test_retry_after_overrides_shorter_backoff() {
    let policy = no_jitter(100, 2_000, 5);
    let err = Error::from_status(429, "slow down", Some(Duration::from_secs(5)));

    let delay = policy.should_retry(1, &err).unwrap();
    assert!(delay >= Duration::from_millis(5_000));
}

#[test]
fn test_backoff_wins_when_longer_than_retry_after() {
    let policy = no_jitter(3_000, 10_000, 5);
    let err = Error::from_status(429, "", Some(Duration::from_secs(1)));

    assert_eq!(policy.should_retry(2, &err), Some(Duration::from_secs(6)));
}

#[test]
fn test_max_attempts_stops_retrying() {
    let policy = no_jitter(10, 100, 3);
    let err = Error::server(503, "unavailable");

    assert!(policy.should_retry(1, &err).is_some());
    assert!(policy.should_retry(2, &err).is_some());
    assert!(policy.should_retry(3, &err).is_none());
}

#[test_case(Error::client(404, "missing") ; "not found")]
#[test_case(Error::client(400, "bad") ; "bad request")]
#[test_case(Error::client(401, "unauthorized") ; "unauthorized")]
#[test_case(Error::server(501, "not implemented") ; "unlisted server status")]
#[test_case(Error::from(ValidationError::new("$", "shape")) ; "validation")]
#[test_case(Error::token_refresh("denied") ; "refresh failure")]
#[test_case(Error::auth("bad key") ; "auth")]
#[test_case(Error::CircuitOpen { target: "api".into() } ; "circuit open")]
#[test_case(Error::DeadlineExceeded { elapsed_ms: 5 } ; "deadline")]
fn test_permanent_errors_never_retry(err: Error) {
    let policy = no_jitter(10, 100, 10);
    assert_eq!(policy.should_retry(1, &err), None);
}

#[test_case(Error::from(TransportError::timeout("slow")) ; "timeout")]
#[test_case(Error::from(TransportError::connect("refused")) ; "network")]
#[test_case(Error::server(429, "") ; "too many requests")]
#[test_case(Error::server(503, "") ; "unavailable")]
#[test_case(Error::server(502, "") ; "bad gateway")]
fn test_transient_errors_retry(err: Error) {
    let policy = no_jitter(10, 100, 10);
    assert!(policy.should_retry(1, &err).is_some());
}

#[test]
fn test_custom_retry_statuses() {
    let policy = RetryPolicy::new(RetryConfig {
        retry_statuses: vec![503],
        ..RetryConfig::default()
    });

    assert!(policy.is_transient(&Error::server(503, "")));
    assert!(!policy.is_transient(&Error::server(500, "")));
}
