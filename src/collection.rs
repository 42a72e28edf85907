//! Building and holding the channel set.
//!
//! [`ChannelCollection`] is assembled once at startup from the parsed
//! configuration. The `class` names in each channel's `queue` and `worker`
//! blocks are resolved against two name-keyed registries, so deployments can
//! plug in their own implementations next to the built-in ones.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::channel::VirtualChannel;
use crate::config::{ProxyConfig, QueueConfig, WorkerConfig};
use crate::error::{ProxyError, Result};
use crate::queue::{MemoryQueue, MessageQueue};
use crate::worker::{HttpWorker, StubWorker, Worker};

type QueueFactory = Box<dyn Fn(&QueueConfig) -> Result<Box<dyn MessageQueue>> + Send + Sync>;
type WorkerFactory = Box<dyn Fn(&str, &WorkerConfig) -> Result<Arc<dyn Worker>> + Send + Sync>;

/// Name-keyed queue constructors.
pub struct QueueRegistry {
    factories: HashMap<String, QueueFactory>,
}

impl QueueRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in queues: `memory`.
    pub fn defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |config: &QueueConfig| {
            Ok(Box::new(MemoryQueue::new(config.queue_size)) as Box<dyn MessageQueue>)
        });
        registry
    }

    /// Register a queue constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&QueueConfig) -> Result<Box<dyn MessageQueue>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    fn resolve(&self, config: &QueueConfig) -> Result<Box<dyn MessageQueue>> {
        let factory = self
            .factories
            .get(&config.class)
            .ok_or_else(|| ProxyError::InvalidConfig(format!("unknown queue class {:?}", config.class)))?;
        factory(config)
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Name-keyed worker constructors.
pub struct WorkerRegistry {
    factories: HashMap<String, WorkerFactory>,
}

impl WorkerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in workers: `http` and `stub`.
    pub fn defaults() -> Self {
        let mut registry = Self::new();
        registry.register("http", |channel: &str, config: &WorkerConfig| {
            let options = config.parse_options()?;
            Ok(Arc::new(HttpWorker::new(channel, options)?) as Arc<dyn Worker>)
        });
        registry.register("stub", |channel: &str, config: &WorkerConfig| {
            let options = config.parse_options()?;
            Ok(Arc::new(StubWorker::new(channel, options)) as Arc<dyn Worker>)
        });
        registry
    }

    /// Register a worker constructor under `name`. The factory receives the
    /// channel name and the raw `worker` config block.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str, &WorkerConfig) -> Result<Arc<dyn Worker>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    fn resolve(&self, channel: &str, config: &WorkerConfig) -> Result<Arc<dyn Worker>> {
        let factory = self
            .factories
            .get(&config.class)
            .ok_or_else(|| ProxyError::InvalidConfig(format!("unknown worker class {:?}", config.class)))?;
        factory(channel, config)
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

/// The full channel set, immutable once built.
#[derive(Debug)]
pub struct ChannelCollection {
    channels: HashMap<String, VirtualChannel>,
}

impl ChannelCollection {
    /// Build every configured channel, resolving queue and worker classes
    /// through the given registries. Any unknown class or bad option block
    /// fails the whole build.
    pub fn from_config(
        config: &ProxyConfig,
        queues: &QueueRegistry,
        workers: &WorkerRegistry,
    ) -> Result<Self> {
        let mut channels = HashMap::with_capacity(config.len());

        for (name, channel_config) in config {
            debug!(
                channel = %name,
                worker = %channel_config.worker.class,
                queue = %channel_config.queue.class,
                "registering channel"
            );

            let queue = queues.resolve(&channel_config.queue)?;
            let worker = workers.resolve(name, &channel_config.worker)?;
            channels.insert(
                name.clone(),
                VirtualChannel::new(name.clone(), queue, worker, channel_config.backoff()),
            );
        }

        Ok(Self { channels })
    }

    /// Look up a channel by name.
    pub fn get(&self, name: &str) -> Option<&VirtualChannel> {
        self.channels.get(name)
    }

    /// Names of all configured channels.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Number of configured channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the collection holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Activate every channel. Fails fast on the first channel that is
    /// already running.
    pub fn activate_all(&self) -> Result<()> {
        for channel in self.channels.values() {
            channel.activate()?;
        }
        Ok(())
    }

    /// Deactivate every channel, waiting for each delivery task to stop.
    pub async fn deactivate_all(&self) {
        for channel in self.channels.values() {
            channel.deactivate().await;
        }
    }
}
