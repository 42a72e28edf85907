//! Virtual channels: one bounded queue, one worker, one delivery task.
//!
//! A [`VirtualChannel`] is the delivery pipeline behind a channel name.
//! `activate` spawns a single long-lived task that drains the queue and
//! drives the worker through the retry loop; `deactivate` cancels it. The
//! task holds the channel's worker for one message at a time, so retries
//! never interleave across messages of the same channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::cancel::CancelToken;
use crate::error::{ProxyError, Result};
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::worker::{Worker, WorkerSession};

/// Most recent delivery failure of a channel.
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    /// Human-readable failure description.
    pub reason: String,
    /// Debug rendering of the underlying error.
    pub trace: String,
    /// When the failure was recorded.
    pub stamp: DateTime<Utc>,
}

/// Counter snapshot returned by [`VirtualChannel::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    /// Messages delivered since the last activation.
    pub sent: u64,
    /// Messages given up on since the last activation.
    pub rejected: u64,
    /// Messages currently buffered in the queue.
    pub in_queue: usize,
}

struct ChannelShared {
    name: String,
    queue: Box<dyn MessageQueue>,
    worker: Arc<dyn Worker>,
    backoff: BackoffPolicy,
    sent: AtomicU64,
    rejected: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

impl ChannelShared {
    fn record_error(&self, err: &ProxyError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastError {
            reason: err.to_string(),
            trace: format!("{err:?}"),
            stamp: Utc::now(),
        });
    }
}

/// A named delivery pipeline: queue, worker, backoff policy, and at most one
/// running delivery task.
pub struct VirtualChannel {
    shared: Arc<ChannelShared>,
    task: Mutex<Option<(CancelToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for VirtualChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualChannel")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl VirtualChannel {
    /// Assemble a channel. It starts idle; call [`activate`](Self::activate)
    /// to begin delivering.
    pub fn new(
        name: impl Into<String>,
        queue: Box<dyn MessageQueue>,
        worker: Arc<dyn Worker>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                name: name.into(),
                queue,
                worker,
                backoff,
                sent: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether a delivery task is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Spawn the delivery task, resetting counters and the recorded error.
    ///
    /// Fails with [`ProxyError::RequestExecution`] when the channel is
    /// already running.
    pub fn activate(&self) -> Result<()> {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return Err(ProxyError::RequestExecution("Virtual channel already is running".into()));
        }

        info!(channel = %self.shared.name, worker = self.shared.worker.name(), "activating virtual channel");

        self.shared.sent.store(0, Ordering::Relaxed);
        self.shared.rejected.store(0, Ordering::Relaxed);
        *self.shared.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let cancel = CancelToken::new();
        let handle = tokio::spawn(delivery_loop(Arc::clone(&self.shared), cancel.clone()));
        *slot = Some((cancel, handle));

        debug!(channel = %self.shared.name, "channel active");
        Ok(())
    }

    /// Cancel the delivery task and wait for it to wind down.
    ///
    /// A no-op on an idle channel; calling it twice is the same as once.
    pub async fn deactivate(&self) {
        let taken = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((cancel, handle)) = taken else {
            return;
        };

        info!(channel = %self.shared.name, "deactivating virtual channel");
        cancel.cancel();
        let _ = handle.await;
        debug!(channel = %self.shared.name, "channel inactive");
    }

    /// Enqueue a message for delivery. Non-blocking; a full queue fails with
    /// [`ProxyError::TemporaryUnavailable`].
    pub fn add_message(&self, message: Message) -> Result<()> {
        debug!(channel = %self.shared.name, id = %message.id, "queueing message");
        self.shared.queue.add_task(message)
    }

    /// Snapshot of the channel counters.
    pub fn get_state(&self) -> ChannelState {
        ChannelState {
            sent: self.shared.sent.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            in_queue: self.shared.queue.current_items_count(),
        }
    }

    /// The most recent delivery failure, optionally clearing it.
    pub fn get_last_error(&self, clear: bool) -> Option<LastError> {
        let mut guard = self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if clear {
            guard.take()
        } else {
            guard.clone()
        }
    }
}

/// The long-lived task body: drain the queue, deliver with retries, stop on
/// cancellation or an unknown error.
async fn delivery_loop(shared: Arc<ChannelShared>, cancel: CancelToken) {
    let _session = match WorkerSession::acquire(Arc::clone(&shared.worker)) {
        Ok(session) => session,
        Err(err) => {
            warn!(channel = %shared.name, error = %err, "worker session could not be prepared");
            shared.record_error(&err);
            return;
        }
    };

    loop {
        let message = tokio::select! {
            taken = shared.queue.get_task() => match taken {
                Ok(message) => message,
                Err(err) => {
                    shared.record_error(&err);
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };

        if !deliver(&shared, &cancel, &message).await {
            return;
        }
    }
}

/// Deliver one message, retrying on transient failures. Returns `false` when
/// the channel loop must stop.
async fn deliver(shared: &ChannelShared, cancel: &CancelToken, message: &Message) -> bool {
    let max_attempts = shared.backoff.max_attempts.max(1);
    let mut attempt = 0;

    while attempt < max_attempts {
        attempt += 1;

        let outcome = tokio::select! {
            result = shared.worker.operate(message) => result,
            _ = cancel.cancelled() => {
                shared.record_error(&ProxyError::Cancelled);
                return false;
            }
        };

        match outcome {
            Ok(()) => {
                shared.sent.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %shared.name, id = %message.id, attempt, "message delivered");
                return true;
            }
            Err(err @ ProxyError::WorkerAwait { .. }) => {
                if attempt == max_attempts {
                    warn!(
                        channel = %shared.name,
                        id = %message.id,
                        attempts = attempt,
                        "delivery attempts exhausted, rejecting message"
                    );
                    shared.record_error(&err);
                    shared.rejected.fetch_add(1, Ordering::Relaxed);
                    return true;
                }

                let delay = shared.backoff.wait(attempt, &err);
                debug!(
                    channel = %shared.name,
                    id = %message.id,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "delivery attempt failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        shared.record_error(&ProxyError::Cancelled);
                        return false;
                    }
                }
            }
            Err(err @ ProxyError::WorkerExecution { .. }) => {
                warn!(channel = %shared.name, id = %message.id, error = %err, "message rejected by upstream");
                shared.record_error(&err);
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            Err(err) => {
                // Errors outside the worker contract halt the whole channel.
                warn!(channel = %shared.name, id = %message.id, error = %err, "unexpected worker error, stopping channel");
                shared.record_error(&err);
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
    }

    true
}
