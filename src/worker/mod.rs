//! Worker abstraction: one delivery attempt per message.
//!
//! A [`Worker`] is the upstream-facing half of a virtual channel. The
//! delivery loop hands it one [`Message`] at a time and interprets the
//! outcome:
//!
//! - `Ok(())` — delivered; the channel counts the message as sent.
//! - [`ProxyError::WorkerAwait`](crate::error::ProxyError::WorkerAwait) —
//!   transient upstream condition; the loop retries after a backoff delay.
//! - [`ProxyError::WorkerExecution`](crate::error::ProxyError::WorkerExecution)
//!   — terminal refusal; the message is rejected.
//! - anything else — the channel records the error and stops.
//!
//! Built-in implementations: [`HttpWorker`] (registry name `http`) and
//! [`StubWorker`] (registry name `stub`).

pub mod http;
pub mod stub;

pub use http::{HttpWorker, HttpWorkerConfig};
pub use stub::{StubOutcome, StubWorker, StubWorkerConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// A delivery backend for one virtual channel.
///
/// Object-safe; channels hold workers as `Arc<dyn Worker>`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Acquire per-channel resources, e.g. an HTTP session. Called once when
    /// the channel activates, before the first [`operate`](Self::operate).
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Release whatever [`prepare`](Self::prepare) acquired. Must be safe to
    /// call when `prepare` never ran or failed.
    fn release(&self) {}

    /// Perform a single delivery attempt for `message`.
    async fn operate(&self, message: &Message) -> Result<()>;

    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;
}

/// Scope guard pairing [`Worker::prepare`] with [`Worker::release`].
///
/// The delivery loop holds one for its whole lifetime, so the session is
/// released on every exit path: normal return, channel abort on an unknown
/// error, and cancellation.
pub struct WorkerSession {
    worker: Arc<dyn Worker>,
}

impl WorkerSession {
    /// Run `prepare` and return a guard that releases on drop.
    pub fn acquire(worker: Arc<dyn Worker>) -> Result<Self> {
        worker.prepare()?;
        Ok(Self { worker })
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.worker.release();
    }
}
