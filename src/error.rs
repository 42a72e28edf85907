use thiserror::Error;

/// Errors produced by the proxy and its components.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Admission-level validation failure (unknown channel, empty message).
    #[error("{0}")]
    RequestParameter(String),

    /// Retry-safe refusal: full queue, maintenance window, inactive channel.
    #[error("{0}")]
    TemporaryUnavailable(String),

    /// Internal state violation, e.g. activating a channel that is already
    /// running.
    #[error("{0}")]
    RequestExecution(String),

    /// Retriable upstream failure. `retry_hint` carries the raw
    /// server-supplied delay (integer seconds or an HTTP-date string);
    /// parsing is deferred to [`BackoffPolicy`](crate::backoff::BackoffPolicy).
    #[error("upstream asked to retry, status {status}: {reason}")]
    WorkerAwait {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream-supplied failure description.
        reason: String,
        /// Raw `retry_after` body field or `Retry-After` header, if any.
        retry_hint: Option<String>,
    },

    /// Terminal upstream failure; the message is rejected without retry.
    #[error("upstream rejected the message, status {status}: {reason}")]
    WorkerExecution {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream-supplied failure description.
        reason: String,
    },

    /// A retry hint that parsed neither as seconds nor as an HTTP-date.
    #[error("unparseable retry hint: {0:?}")]
    RetryHint(String),

    /// The delivery task was stopped while a message was in flight.
    #[error("Worker was stopped")]
    Cancelled,

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        ProxyError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
