// src/batching/multi_channel.rs
//! Channel-partitioned batching
//!
//! A router maps each event to a channel key. Each key gets its own
//! `EventBatcher` until `max_channels` batchers exist; after that, new keys
//! share the default batcher. Existing channels are never evicted.

use crate::batching::batcher::{BatchStatistics, BatcherConfig, EventBatcher};
use crate::batching::sink::BatchSink;
use crate::events::TelemetryEvent;
use crate::utils::errors::{Result, TelemetryError};
use crate::utils::shutdown::{Lifecycle, ShutdownHook};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Key of the shared fallback batcher
pub const DEFAULT_CHANNEL: &str = "default";

/// Maps an event to its channel key
pub type Router = Arc<dyn Fn(&TelemetryEvent) -> String + Send + Sync>;

/// Multi-channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiChannelConfig {
    /// Maximum number of dedicated channels (the default batcher excluded)
    pub max_channels: usize,
}

impl Default for MultiChannelConfig {
    fn default() -> Self {
        Self { max_channels: 100 }
    }
}

/// Route by event category
pub fn route_by_category() -> Router {
    Arc::new(|e: &TelemetryEvent| e.category.clone())
}

/// Route by event type
pub fn route_by_event_type() -> Router {
    Arc::new(|e: &TelemetryEvent| e.event_type.to_string())
}

/// Route by session
pub fn route_by_session() -> Router {
    Arc::new(|e: &TelemetryEvent| e.session_id.clone())
}

struct ChannelsInner {
    config: MultiChannelConfig,
    template: BatcherConfig,
    router: Router,
    sink: Arc<dyn BatchSink>,
    channels: RwLock<HashMap<String, EventBatcher>>,
    default: EventBatcher,
    shutting_down: AtomicBool,
    fallback_warned: AtomicBool,
    hook: Mutex<Option<ShutdownHook>>,
}

/// Batcher fan-out keyed by a routing function
#[derive(Clone)]
pub struct MultiChannelBatcher {
    inner: Arc<ChannelsInner>,
}

impl MultiChannelBatcher {
    /// Create a multi-channel batcher
    ///
    /// `template` configures auto-created channels and the default batcher.
    pub fn new(
        config: MultiChannelConfig,
        template: BatcherConfig,
        router: Router,
        sink: Arc<dyn BatchSink>,
    ) -> Result<Self> {
        if config.max_channels == 0 {
            return Err(TelemetryError::ConfigError(
                "max_channels must be greater than 0".to_string(),
            ));
        }

        let default = EventBatcher::new(
            template.clone().with_name(DEFAULT_CHANNEL),
            Arc::clone(&sink),
        )?;

        info!(
            "Multi-channel batcher ready (max_channels={})",
            config.max_channels
        );

        Ok(Self {
            inner: Arc::new(ChannelsInner {
                config,
                template,
                router,
                sink,
                channels: RwLock::new(HashMap::new()),
                default,
                shutting_down: AtomicBool::new(false),
                fallback_warned: AtomicBool::new(false),
                hook: Mutex::new(None),
            }),
        })
    }

    /// Register a channel with its own options, delivering to the shared sink
    pub fn configure_channel(&self, key: impl Into<String>, config: BatcherConfig) -> Result<()> {
        let sink = Arc::clone(&self.inner.sink);
        self.configure_channel_with_sink(key, config, sink)
    }

    /// Register a channel with its own options and sink
    ///
    /// Fails if the key is already registered, the channel limit is reached or
    /// shutdown has begun.
    pub fn configure_channel_with_sink(
        &self,
        key: impl Into<String>,
        config: BatcherConfig,
        sink: Arc<dyn BatchSink>,
    ) -> Result<()> {
        let key = key.into();
        if key == DEFAULT_CHANNEL {
            return Err(TelemetryError::ChannelExists(key));
        }

        let mut channels = self.inner.channels.write();
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(TelemetryError::ShuttingDown);
        }
        if channels.contains_key(&key) {
            return Err(TelemetryError::ChannelExists(key));
        }
        if channels.len() >= self.inner.config.max_channels {
            return Err(TelemetryError::ChannelLimitReached(
                self.inner.config.max_channels,
            ));
        }

        let batcher = EventBatcher::new(config.with_name(key.clone()), sink)?;
        info!("Configured channel '{}'", key);
        channels.insert(key, batcher);
        Ok(())
    }

    /// Route and add an event
    pub async fn add(&self, event: TelemetryEvent) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(TelemetryError::ShuttingDown);
        }

        let key = (self.inner.router)(&event);
        let batcher = self.inner.channel_for(&key)?;
        batcher.add(event).await
    }

    /// Route and add events in order
    pub async fn add_batch(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        for event in events {
            self.add(event).await?;
        }
        Ok(())
    }

    /// Flush every channel and the default batcher concurrently
    pub async fn flush_all(&self) {
        let batchers = self.inner.all_batchers();
        trace!("Flushing {} batchers", batchers.len());
        join_all(batchers.iter().map(|(_, b)| b.flush())).await;
    }

    /// Per-channel statistics, plus a `"default"` entry
    pub fn get_all_statistics(&self) -> HashMap<String, BatchStatistics> {
        self.inner
            .all_batchers()
            .into_iter()
            .map(|(name, batcher)| (name, batcher.statistics()))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Batcher for a key, if it has a dedicated channel
    pub fn channel(&self, key: &str) -> Option<EventBatcher> {
        self.inner.channels.read().get(key).cloned()
    }

    pub fn default_batcher(&self) -> &EventBatcher {
        &self.inner.default
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Shut down every batcher concurrently
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    /// Shut down when `lifecycle` is cancelled
    pub fn attach_shutdown(&self, lifecycle: &Lifecycle) {
        let weak: Weak<ChannelsInner> = Arc::downgrade(&self.inner);
        let hook = lifecycle.register("multi-channel-batcher", move || async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.shutdown().await {
                    warn!("Multi-channel shutdown failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.inner.hook.lock().replace(hook) {
            previous.detach();
        }
    }
}

impl ChannelsInner {
    fn channel_for(&self, key: &str) -> Result<EventBatcher> {
        if key == DEFAULT_CHANNEL {
            return Ok(self.default.clone());
        }

        if let Some(batcher) = self.channels.read().get(key) {
            return Ok(batcher.clone());
        }

        let mut channels = self.channels.write();
        if let Some(batcher) = channels.get(key) {
            return Ok(batcher.clone());
        }

        // Checked under the write lock so shutdown never misses a new channel
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(TelemetryError::ShuttingDown);
        }

        if channels.len() >= self.config.max_channels {
            metrics::counter!("telemetry_channel_fallback_total").increment(1);
            if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    "Channel limit ({}) reached; routing new keys to the default channel",
                    self.config.max_channels
                );
            } else {
                trace!("Routing key '{}' to the default channel", key);
            }
            return Ok(self.default.clone());
        }

        let batcher = EventBatcher::new(
            self.template.clone().with_name(key),
            Arc::clone(&self.sink),
        )?;
        debug!("Created channel '{}'", key);
        channels.insert(key.to_string(), batcher.clone());
        Ok(batcher)
    }

    fn all_batchers(&self) -> Vec<(String, EventBatcher)> {
        let mut batchers: Vec<(String, EventBatcher)> = self
            .channels
            .read()
            .iter()
            .map(|(k, b)| (k.clone(), b.clone()))
            .collect();
        batchers.push((DEFAULT_CHANNEL.to_string(), self.default.clone()));
        batchers
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down multi-channel batcher");
        }

        if let Some(hook) = self.hook.lock().take() {
            hook.detach();
        }

        let batchers = self.all_batchers();
        let results = join_all(batchers.iter().map(|(_, b)| b.shutdown())).await;
        results.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::sink::ChannelSink;
    use crate::events::EventType;

    fn event(category: &str, i: usize) -> TelemetryEvent {
        TelemetryEvent::builder("sess", EventType::Stream, category, "act")
            .id(format!("{}_{}", category, i))
            .timestamp(i as i64)
            .build()
    }

    fn template() -> BatcherConfig {
        BatcherConfig {
            name: "template".to_string(),
            max_batch_size: 10,
            max_wait_time_ms: 60_000,
            flush_on_shutdown: true,
        }
    }

    fn batcher(max_channels: usize) -> (MultiChannelBatcher, tokio::sync::mpsc::UnboundedReceiver<Vec<TelemetryEvent>>) {
        let (sink, rx) = ChannelSink::new();
        let multi = MultiChannelBatcher::new(
            MultiChannelConfig { max_channels },
            template(),
            route_by_category(),
            Arc::new(sink),
        )
        .unwrap();
        (multi, rx)
    }

    #[tokio::test]
    async fn test_configure_after_shutdown_rejected() {
        let (multi, _rx) = batcher(10);
        multi.shutdown().await.unwrap();

        let err = multi.configure_channel("late", template()).unwrap_err();
        assert!(matches!(err, TelemetryError::ShuttingDown));
        assert_eq!(multi.channel_count(), 0);
        assert!(multi.channel("late").is_none());
    }

    #[tokio::test]
    async fn test_routes_by_key() {
        let (multi, _rx) = batcher(10);

        multi.add(event("llm", 0)).await.unwrap();
        multi.add(event("tool", 1)).await.unwrap();
        multi.add(event("llm", 2)).await.unwrap();

        assert_eq!(multi.channel_names(), vec!["llm", "tool"]);
        let stats = multi.get_all_statistics();
        assert_eq!(stats["llm"].current_batch_size, 2);
        assert_eq!(stats["tool"].current_batch_size, 1);
        assert_eq!(stats[DEFAULT_CHANNEL].current_batch_size, 0);
    }

    #[tokio::test]
    async fn test_overflow_routes_to_default() {
        let (multi, _rx) = batcher(2);

        multi.add(event("a", 0)).await.unwrap();
        multi.add(event("b", 1)).await.unwrap();
        multi.add(event("c", 2)).await.unwrap();
        multi.add(event("d", 3)).await.unwrap();

        assert_eq!(multi.channel_count(), 2);
        let stats = multi.get_all_statistics();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[DEFAULT_CHANNEL].total_events, 2);
        assert!(multi.channel("c").is_none());
    }

    #[tokio::test]
    async fn test_configure_channel_rejects_duplicates() {
        let (multi, _rx) = batcher(2);

        multi.configure_channel("llm", template()).unwrap();
        assert!(matches!(
            multi.configure_channel("llm", template()),
            Err(TelemetryError::ChannelExists(_))
        ));
        assert!(matches!(
            multi.configure_channel(DEFAULT_CHANNEL, template()),
            Err(TelemetryError::ChannelExists(_))
        ));

        multi.configure_channel("tool", template()).unwrap();
        assert!(matches!(
            multi.configure_channel("other", template()),
            Err(TelemetryError::ChannelLimitReached(2))
        ));
        assert_eq!(multi.channel_count(), 2);
    }

    #[tokio::test]
    async fn test_configured_channel_uses_own_options() {
        let (multi, mut rx) = batcher(4);
        let mut small = template();
        small.max_batch_size = 2;
        multi.configure_channel("llm", small).unwrap();

        multi.add(event("llm", 0)).await.unwrap();
        multi.add(event("llm", 1)).await.unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(multi.channel("llm").unwrap().config().max_batch_size, 2);
    }

    #[tokio::test]
    async fn test_flush_all_and_shutdown() {
        let (multi, mut rx) = batcher(1);

        multi.add(event("a", 0)).await.unwrap();
        multi.add(event("b", 1)).await.unwrap();
        multi.flush_all().await;

        let mut sizes = vec![rx.recv().await.unwrap().len(), rx.recv().await.unwrap().len()];
        sizes.sort();
        assert_eq!(sizes, vec![1, 1]);

        multi.add(event("a", 2)).await.unwrap();
        multi.shutdown().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        assert!(matches!(
            multi.add(event("a", 3)).await,
            Err(TelemetryError::ShuttingDown)
        ));
        assert!(multi.channel("a").unwrap().is_shutting_down());
        assert!(multi.default_batcher().is_shutting_down());
    }

    #[tokio::test]
    async fn test_default_key_uses_shared_batcher() {
        let (sink, _rx) = ChannelSink::new();
        let multi = MultiChannelBatcher::new(
            MultiChannelConfig::default(),
            template(),
            Arc::new(|_: &TelemetryEvent| DEFAULT_CHANNEL.to_string()),
            Arc::new(sink),
        )
        .unwrap();

        multi.add(event("x", 0)).await.unwrap();
        assert_eq!(multi.channel_count(), 0);
        assert_eq!(multi.default_batcher().current_batch_size(), 1);
    }
}
