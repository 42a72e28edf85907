//! Scriptable worker for tests and demos. Registry name: `stub`.
//!
//! [`StubWorker`] emulates an upstream without any network traffic. Each
//! `operate` call consumes the next entry of the configured outcome and delay
//! scenarios; once a scenario runs out the worker falls back to dice rolls
//! weighted by `error_chance` and `delay_chance`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::Worker;
use crate::error::{ProxyError, Result};
use crate::message::Message;

/// One scripted delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubOutcome {
    /// Delivery succeeds.
    Send,
    /// Delivery fails with a retriable error.
    Await,
    /// Delivery fails terminally.
    Reject,
}

/// Options for [`StubWorker`], deserialized from the channel's `worker`
/// config block.
#[derive(Debug, Clone, Deserialize)]
pub struct StubWorkerConfig {
    /// Lower bound of the emulated delivery delay.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Upper bound of the emulated delivery delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Percent chance of a terminal failure on the random path.
    #[serde(default = "default_error_chance")]
    pub error_chance: u8,
    /// Percent chance of a retriable failure on the random path.
    #[serde(default = "default_delay_chance")]
    pub delay_chance: u8,
    /// Scripted outcomes consumed one per attempt, in order.
    #[serde(default)]
    pub outcome_scenario: Vec<StubOutcome>,
    /// Scripted per-attempt delays, in milliseconds.
    #[serde(default)]
    pub delay_scenario_ms: Vec<u64>,
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_error_chance() -> u8 {
    5
}

fn default_delay_chance() -> u8 {
    20
}

impl Default for StubWorkerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            error_chance: default_error_chance(),
            delay_chance: default_delay_chance(),
            outcome_scenario: Vec::new(),
            delay_scenario_ms: Vec::new(),
        }
    }
}

/// A worker that emulates deliveries instead of performing them.
pub struct StubWorker {
    channel: String,
    config: StubWorkerConfig,
    step: AtomicUsize,
    delivered: Mutex<Vec<Message>>,
}

impl StubWorker {
    /// Build a worker for `channel` from its config block.
    pub fn new(channel: impl Into<String>, config: StubWorkerConfig) -> Self {
        Self {
            channel: channel.into(),
            config,
            step: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// A zero-delay worker running the given outcome script, then succeeding.
    pub fn scripted(channel: impl Into<String>, outcomes: Vec<StubOutcome>) -> Self {
        Self::new(
            channel,
            StubWorkerConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
                error_chance: 0,
                delay_chance: 0,
                outcome_scenario: outcomes,
                delay_scenario_ms: vec![0],
            },
        )
    }

    /// Total `operate` calls so far.
    pub fn attempts(&self) -> usize {
        self.step.load(Ordering::SeqCst)
    }

    /// Messages that were reported as sent, in delivery order.
    pub fn delivered(&self) -> Vec<Message> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn roll(&self) -> StubOutcome {
        let coin = fastrand::u8(0..100);
        if coin < self.config.error_chance {
            StubOutcome::Reject
        } else if coin < self.config.error_chance.saturating_add(self.config.delay_chance) {
            StubOutcome::Await
        } else {
            StubOutcome::Send
        }
    }
}

#[async_trait::async_trait]
impl Worker for StubWorker {
    async fn operate(&self, message: &Message) -> Result<()> {
        let step = self.step.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .config
            .delay_scenario_ms
            .get(step)
            .copied()
            .or_else(|| self.config.delay_scenario_ms.last().copied())
            .unwrap_or_else(|| fastrand::u64(self.config.min_delay_ms..=self.config.max_delay_ms));
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let outcome = self
            .config
            .outcome_scenario
            .get(step)
            .copied()
            .unwrap_or_else(|| self.roll());

        match outcome {
            StubOutcome::Send => {
                info!(
                    channel = %self.channel,
                    id = %message.id,
                    delay_ms = delay,
                    "stub accepted the message"
                );
                self.delivered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message.clone());
                Ok(())
            }
            StubOutcome::Await => Err(ProxyError::WorkerAwait {
                status: 503,
                reason: "Emulated transient refusal".into(),
                retry_hint: None,
            }),
            StubOutcome::Reject => Err(ProxyError::WorkerExecution {
                status: 400,
                reason: "Emulated terminal refusal".into(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
