//! Bounded per-channel message buffers.
//!
//! Every virtual channel owns exactly one queue. Admission pushes with the
//! non-blocking [`MessageQueue::add_task`]; the channel's delivery task is the
//! single consumer and awaits on [`MessageQueue::get_task`]. Implementations
//! are resolved by name through the
//! [`QueueRegistry`](crate::collection::QueueRegistry).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::error::{ProxyError, Result};
use crate::message::Message;

/// Capability set required from a channel's buffer.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Non-blocking enqueue. Fails with [`ProxyError::TemporaryUnavailable`]
    /// when the queue is at capacity. Insertion order is preserved.
    fn add_task(&self, message: Message) -> Result<()>;

    /// Await the oldest buffered message.
    async fn get_task(&self) -> Result<Message>;

    /// Number of buffered messages. Observational only; a concurrent take
    /// may make it lag by one slot.
    fn current_items_count(&self) -> usize;
}

/// Bounded FIFO queue backed by a tokio mpsc channel.
///
/// Registry name: `memory`. Capacity is fixed at construction; there is no
/// persistence, so whatever is buffered at shutdown is lost.
pub struct MemoryQueue {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl MemoryQueue {
    /// Create a queue holding at most `queue_size` messages.
    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn add_task(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|_| {
            ProxyError::TemporaryUnavailable("Queue of this channel is full. Try again later".into())
        })
    }

    async fn get_task(&self) -> Result<Message> {
        // The sender half lives in `self`, so the channel cannot close while
        // the queue is alive.
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ProxyError::Other("message queue is closed".into()))
    }

    fn current_items_count(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
