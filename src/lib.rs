//! # mproxy
//!
//! An HTTP-fronted message proxy. Clients POST messages to named **virtual
//! channels**; each channel buffers them in a bounded in-memory queue and a
//! dedicated delivery task pushes them to an upstream service through the
//! channel's worker, retrying transient failures with exponential backoff
//! and honouring server-supplied `Retry-After` hints.
//!
//! ## Core concepts
//!
//! - **[`Message`]** — the unit of delivery, with a generated id.
//! - **[`MessageQueue`]** — bounded FIFO buffer; `memory` built in.
//! - **[`Worker`]** — one delivery attempt per message; [`HttpWorker`]
//!   (chat-style HTTP API) and [`StubWorker`] (emulation) built in.
//! - **[`BackoffPolicy`]** — pure `(attempt, error) → delay` retry pacing.
//! - **[`VirtualChannel`]** — queue + worker + one delivery task.
//! - **[`ChannelCollection`]** — the named channel set, built from YAML
//!   config through the queue/worker registries.
//! - **[`server`]** — the axum admission layer: `/api/ping`,
//!   `/api/send/{channel}`, `/api/stat/{channel}`.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mproxy::collection::{ChannelCollection, QueueRegistry, WorkerRegistry};
//! use mproxy::server::{build_app, AppState, DEFAULT_RETRY_AFTER};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = mproxy::config::load("config.example.yaml")?;
//!     let channels = ChannelCollection::from_config(
//!         &config,
//!         &QueueRegistry::defaults(),
//!         &WorkerRegistry::defaults(),
//!     )?;
//!
//!     let state = Arc::new(AppState::new(channels, DEFAULT_RETRY_AFTER));
//!     state.channels.activate_all()?;
//!
//!     let listener = tokio::net::TcpListener::bind(("localhost", 8080)).await?;
//!     state.set_maintenance(false);
//!     axum::serve(listener, build_app(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cancel;
pub mod channel;
pub mod collection;
pub mod config;
pub mod error;
pub mod message;
pub mod queue;
pub mod server;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use cancel::CancelToken;
pub use channel::{ChannelState, LastError, VirtualChannel};
pub use collection::{ChannelCollection, QueueRegistry, WorkerRegistry};
pub use error::{ProxyError, Result};
pub use message::{Message, MessageFields};
pub use queue::{MemoryQueue, MessageQueue};
pub use server::{build_app, AppState};
pub use worker::{HttpWorker, StubWorker, Worker};
