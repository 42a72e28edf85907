//! Retry pacing between delivery attempts.
//!
//! [`BackoffPolicy`] decides how long a channel's delivery task waits before
//! re-trying a message that failed with a retriable error. The default delay
//! grows exponentially from `min_wait` and is clamped at `max_wait`; when the
//! upstream supplied a usable retry hint (`Retry-After` header or a
//! `retry_after` body field), the hint wins over the computed delay.

use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};

use crate::error::{ProxyError, Result};

const DEFAULT_MIN_WAIT: u64 = 5;
const DEFAULT_MAX_WAIT: u64 = 7200;
const DEFAULT_BASE: f64 = 4.0;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Per-channel retry policy.
///
/// A pure function of `(attempt, last_error)`; the delivery loop owns the
/// actual sleeping so the policy stays trivially testable.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use mproxy::backoff::BackoffPolicy;
/// use mproxy::error::ProxyError;
///
/// let policy = BackoffPolicy { min_wait: 1, max_wait: 60, base: 2.0, max_attempts: 5 };
/// let err = ProxyError::WorkerAwait { status: 503, reason: "busy".into(), retry_hint: None };
///
/// assert_eq!(policy.wait(1, &err), Duration::from_secs(3)); // 1 + 2^1
/// assert_eq!(policy.wait(2, &err), Duration::from_secs(5)); // 1 + 2^2
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Floor added to every computed delay, in seconds.
    pub min_wait: u64,
    /// Ceiling for any delay, server hints included, in seconds.
    pub max_wait: u64,
    /// Exponential growth base; the default delay is `min_wait + base^attempt`.
    pub base: f64,
    /// Hard cap on delivery attempts per message.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            base: DEFAULT_BASE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    ///
    /// The upstream hint on a [`ProxyError::WorkerAwait`] overrides the
    /// exponential default when it parses; an unparseable hint falls back to
    /// the default. Either way the result never exceeds `max_wait`.
    pub fn wait(&self, attempt: u32, last_error: &ProxyError) -> Duration {
        let max_wait = self.max_wait as f64;

        let exp = self.base.powi(attempt as i32);
        let default = if exp.is_finite() {
            (self.min_wait as f64 + exp).min(max_wait)
        } else {
            max_wait
        };

        let chosen = match last_error {
            ProxyError::WorkerAwait {
                retry_hint: Some(hint),
                ..
            } => parse_retry_hint(hint).map(|secs| secs as f64).unwrap_or(default),
            _ => default,
        };

        Duration::from_secs_f64(chosen.min(max_wait))
    }
}

/// Parse a server-supplied retry hint into whole seconds.
///
/// Accepted inputs, in order of precedence:
/// - an integer or real number of seconds (truncated, clamped at zero);
/// - an HTTP-date ending in `GMT`, compared against the local clock;
/// - an HTTP-date ending in `UTC` (treated as `+0000`) or carrying an
///   explicit numeric offset, compared against UTC.
///
/// Date differences round up to the next whole second and clamp at zero.
/// Anything else is [`ProxyError::RetryHint`].
pub fn parse_retry_hint(value: &str) -> Result<u64> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs.max(0) as u64);
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() {
            return Ok(secs.trunc().max(0.0) as u64);
        }
        return Err(ProxyError::RetryHint(value.to_string()));
    }

    if value.ends_with("GMT") {
        let target = NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
            .map_err(|_| ProxyError::RetryHint(value.to_string()))?;
        return Ok(clamp_ceil(target - chrono::Local::now().naive_local()));
    }

    let rewritten;
    let candidate = if value.ends_with("UTC") {
        rewritten = format!("{}+0000", &value[..value.len() - 3]);
        rewritten.as_str()
    } else {
        value
    };

    let target = chrono::DateTime::parse_from_str(candidate, "%a, %d %b %Y %H:%M:%S %z")
        .map_err(|_| ProxyError::RetryHint(value.to_string()))?;
    Ok(clamp_ceil(target.with_timezone(&chrono::Utc) - chrono::Utc::now()))
}

/// Whole seconds until `diff` elapses: rounded up, never negative.
fn clamp_ceil(diff: TimeDelta) -> u64 {
    let millis = diff.num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}
