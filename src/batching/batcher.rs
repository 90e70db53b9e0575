// src/batching/batcher.rs
//! Event batcher with size and time flush triggers
//!
//! Events are appended to an active batch. A batch is sealed when it reaches
//! `max_batch_size`, when its first event has waited `max_wait_time_ms`, on an
//! explicit `flush()`, or on `shutdown()`. Sealed batches enter a FIFO pending
//! queue that is drained under a delivery lock, so at most one sink call is in
//! flight per batcher and batches reach the sink in arrival order.

use crate::batching::sink::BatchSink;
use crate::events::TelemetryEvent;
use crate::utils::errors::{Result, TelemetryError};
use crate::utils::shutdown::{Lifecycle, ShutdownHook};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Batcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Name used in logs and metric labels
    pub name: String,

    /// Maximum events per batch
    pub max_batch_size: usize,

    /// Maximum time (milliseconds) the first event of a batch may wait
    pub max_wait_time_ms: u64,

    /// Deliver the partial batch when shutting down
    pub flush_on_shutdown: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_batch_size: 100,
            max_wait_time_ms: 5000,
            flush_on_shutdown: true,
        }
    }
}

impl BatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(TelemetryError::ConfigError(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_wait_time_ms == 0 {
            return Err(TelemetryError::ConfigError(
                "max_wait_time_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batcher statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    /// Events accepted by `add`/`add_batch`
    pub total_events: u64,

    /// Batches the sink accepted
    pub total_batches: u64,

    /// Sink invocations, successful or not
    pub flush_count: u64,

    /// Sink invocations that failed
    pub error_count: u64,

    pub largest_batch: usize,

    /// Events handed to the sink per invocation
    pub average_batch_size: f64,

    /// Events waiting in the active (unsealed) batch
    pub current_batch_size: usize,

    pub last_flush_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    total_events: u64,
    total_batches: u64,
    flush_count: u64,
    error_count: u64,
    largest_batch: usize,
    events_flushed: u64,
    last_flush_at: Option<DateTime<Utc>>,
}

impl Counters {
    fn snapshot(&self, current_batch_size: usize) -> BatchStatistics {
        let average_batch_size = if self.flush_count == 0 {
            0.0
        } else {
            self.events_flushed as f64 / self.flush_count as f64
        };

        BatchStatistics {
            total_events: self.total_events,
            total_batches: self.total_batches,
            flush_count: self.flush_count,
            error_count: self.error_count,
            largest_batch: self.largest_batch,
            average_batch_size,
            current_batch_size,
            last_flush_at: self.last_flush_at,
        }
    }
}

struct BatchState {
    batch: Vec<TelemetryEvent>,
    pending: VecDeque<Vec<TelemetryEvent>>,
    timer: Option<JoinHandle<()>>,
    /// Bumped every time the active batch is sealed
    generation: u64,
    accepting: bool,
}

struct BatcherInner {
    config: BatcherConfig,
    sink: Arc<dyn BatchSink>,
    state: Mutex<BatchState>,
    counters: Mutex<Counters>,
    delivery: tokio::sync::Mutex<()>,
    hook: Mutex<Option<ShutdownHook>>,
}

/// Size/time bounded event batcher
///
/// Cheap to clone; clones share the same batch and statistics.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
}

impl EventBatcher {
    /// Create a new batcher delivering to `sink`
    pub fn new(config: BatcherConfig, sink: Arc<dyn BatchSink>) -> Result<Self> {
        config.validate()?;

        debug!(
            "Creating batcher '{}' (max_batch_size={}, max_wait_time={}ms)",
            config.name, config.max_batch_size, config.max_wait_time_ms
        );

        let capacity = config.max_batch_size.min(1024);

        Ok(Self {
            inner: Arc::new(BatcherInner {
                config,
                sink,
                state: Mutex::new(BatchState {
                    batch: Vec::with_capacity(capacity),
                    pending: VecDeque::new(),
                    timer: None,
                    generation: 0,
                    accepting: true,
                }),
                counters: Mutex::new(Counters::default()),
                delivery: tokio::sync::Mutex::new(()),
                hook: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Append an event, flushing immediately if the batch is now full
    ///
    /// Fails with `ShuttingDown` once `shutdown()` has begun.
    pub async fn add(&self, event: TelemetryEvent) -> Result<()> {
        let sealed = self.inner.push(event)?;
        if sealed {
            self.inner.drain().await;
        }
        Ok(())
    }

    /// Append events in order with the same accounting as repeated `add`
    ///
    /// Input larger than `max_batch_size` is split across several flushes.
    pub async fn add_batch(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        trace!("Adding {} events to batcher '{}'", events.len(), self.name());
        for event in events {
            self.add(event).await?;
        }
        Ok(())
    }

    /// Deliver the active batch now
    ///
    /// A no-op on an empty batch. Waits for any delivery already in flight.
    pub async fn flush(&self) {
        {
            let mut state = self.inner.state.lock();
            self.inner.seal(&mut state, true);
        }
        self.inner.drain().await;
    }

    /// Stop accepting events and, if configured, deliver the partial batch
    ///
    /// Idempotent. Concurrent callers all return after delivery completes.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    /// Shut down when `lifecycle` is cancelled
    pub fn attach_shutdown(&self, lifecycle: &Lifecycle) {
        let weak: Weak<BatcherInner> = Arc::downgrade(&self.inner);
        let hook = lifecycle.register(format!("batcher:{}", self.name()), move || async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.shutdown().await {
                    warn!("Batcher shutdown failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.inner.hook.lock().replace(hook) {
            previous.detach();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        !self.inner.state.lock().accepting
    }

    /// Events in the active batch
    pub fn current_batch_size(&self) -> usize {
        self.inner.state.lock().batch.len()
    }

    pub fn statistics(&self) -> BatchStatistics {
        let current = self.current_batch_size();
        self.inner.counters.lock().snapshot(current)
    }
}

impl BatcherInner {
    /// Append under the state lock; returns true when the batch was sealed
    fn push(self: &Arc<Self>, event: TelemetryEvent) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(TelemetryError::ShuttingDown);
        }

        state.batch.push(event);
        self.counters.lock().total_events += 1;
        metrics::counter!("telemetry_events_added_total", "batcher" => self.config.name.clone())
            .increment(1);

        if state.batch.len() >= self.config.max_batch_size {
            trace!("Batcher '{}' reached max batch size", self.config.name);
            self.seal(&mut state, true);
            return Ok(true);
        }

        if state.batch.len() == 1 {
            self.arm_timer(&mut state);
        }

        Ok(false)
    }

    /// Move the active batch to the pending queue and cancel its timer
    ///
    /// The timer task seals its own batch with `abort_timer = false` so it is
    /// not cancelled while delivering.
    fn seal(&self, state: &mut BatchState, abort_timer: bool) {
        if let Some(timer) = state.timer.take() {
            if abort_timer {
                timer.abort();
            }
        }

        if !state.batch.is_empty() {
            let capacity = self.config.max_batch_size.min(1024);
            let batch = std::mem::replace(&mut state.batch, Vec::with_capacity(capacity));
            state.pending.push_back(batch);
        }

        state.generation = state.generation.wrapping_add(1);
    }

    fn arm_timer(self: &Arc<Self>, state: &mut BatchState) {
        let weak = Arc::downgrade(self);
        let generation = state.generation;
        let wait = self.config.max_wait_time();

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(generation).await;
            }
        }));
    }

    async fn on_timer(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            trace!("Batcher '{}' wait time elapsed", self.config.name);
            self.seal(&mut state, false);
        }
        self.drain().await;
    }

    /// Deliver pending batches in FIFO order, one at a time
    async fn drain(&self) {
        let _delivery = self.delivery.lock().await;

        loop {
            let next = self.state.lock().pending.pop_front();
            let Some(batch) = next else { break };
            self.deliver(batch).await;
        }
    }

    async fn deliver(&self, batch: Vec<TelemetryEvent>) {
        let size = batch.len();
        let name = &self.config.name;
        debug!("Flushing batch of {} events from '{}'", size, name);

        {
            let mut counters = self.counters.lock();
            counters.flush_count += 1;
            counters.events_flushed += size as u64;
            counters.largest_batch = counters.largest_batch.max(size);
            counters.last_flush_at = Some(Utc::now());
        }

        let start = Instant::now();
        let outcome = match AssertUnwindSafe(self.sink.on_batch(&batch))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(TelemetryError::SinkFailed(panic_message(panic.as_ref()))),
        };

        metrics::histogram!("telemetry_batch_size", "batcher" => name.clone()).record(size as f64);

        match outcome {
            Ok(()) => {
                self.counters.lock().total_batches += 1;
                metrics::counter!("telemetry_batches_flushed_total", "batcher" => name.clone())
                    .increment(1);
                debug!("Batch from '{}' delivered in {:?}", name, start.elapsed());
            }
            Err(e) => {
                self.counters.lock().error_count += 1;
                metrics::counter!("telemetry_batch_errors_total", "batcher" => name.clone())
                    .increment(1);
                error!("Sink failed for batch of {} events from '{}': {}", size, name, e);

                let sink = &self.sink;
                if std::panic::catch_unwind(AssertUnwindSafe(|| sink.on_error(&e, &batch)))
                    .is_err()
                {
                    warn!("Error handler of '{}' panicked", name);
                }
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let first = {
            let mut state = self.state.lock();
            let first = state.accepting;
            state.accepting = false;

            if first {
                if self.config.flush_on_shutdown {
                    self.seal(&mut state, true);
                } else {
                    if let Some(timer) = state.timer.take() {
                        timer.abort();
                    }
                    if !state.batch.is_empty() {
                        warn!(
                            "Batcher '{}' discarding {} unflushed events on shutdown",
                            self.config.name,
                            state.batch.len()
                        );
                    }
                }
            }
            first
        };

        if let Some(hook) = self.hook.lock().take() {
            hook.detach();
        }

        if first {
            info!("Shutting down batcher '{}'", self.config.name);
        }

        self.drain().await;
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("Sink panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("Sink panicked: {}", msg)
    } else {
        "Sink panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::sink::{ChannelSink, FnSink};
    use crate::events::EventType;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_event(i: usize) -> TelemetryEvent {
        TelemetryEvent::builder("sess", EventType::Stream, "llm", "chunk")
            .id(format!("evt_{}", i))
            .timestamp(i as i64)
            .build()
    }

    fn config(max_batch_size: usize, max_wait_time_ms: u64) -> BatcherConfig {
        BatcherConfig {
            name: "test".to_string(),
            max_batch_size,
            max_wait_time_ms,
            flush_on_shutdown: true,
        }
    }

    #[tokio::test]
    async fn test_flush_on_size() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(3, 60_000), Arc::new(sink)).unwrap();

        for i in 0..7 {
            batcher.add(test_event(i)).await.unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().len(), 3);
        assert_eq!(rx.recv().await.unwrap().len(), 3);
        assert!(rx.try_recv().is_err());

        let stats = batcher.statistics();
        assert_eq!(stats.total_events, 7);
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.current_batch_size, 1);
        assert_eq!(stats.largest_batch, 3);
        assert_eq!(stats.average_batch_size, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timer() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(100, 1_000), Arc::new(sink)).unwrap();

        let started = tokio::time::Instant::now();
        batcher.add(test_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        batcher.add(test_event(2)).await.unwrap();

        let batch = rx.recv().await.unwrap();
        let waited = started.elapsed();
        assert_eq!(batch.len(), 2);
        // Deadline counts from the first event, not the last
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_100));
        assert_eq!(batcher.statistics().current_batch_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_cancels_timer() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(2, 1_000), Arc::new(sink)).unwrap();

        batcher.add(test_event(1)).await.unwrap();
        batcher.add(test_event(2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.statistics().flush_count, 1);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sink = FnSink::new(move |_batch: Vec<TelemetryEvent>| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), TelemetryError>(()) }
        });
        let batcher = EventBatcher::new(config(10, 60_000), Arc::new(sink)).unwrap();

        let before = batcher.statistics();
        batcher.flush().await;
        batcher.flush().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(batcher.statistics(), before);
    }

    #[tokio::test]
    async fn test_sink_failure_is_isolated() {
        let errors = Arc::new(AtomicUsize::new(0));

        struct FailingSink {
            errors: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl BatchSink for FailingSink {
            async fn on_batch(&self, batch: &[TelemetryEvent]) -> Result<()> {
                if batch[0].id == "evt_0" {
                    Err(TelemetryError::SinkFailed("disk full".into()))
                } else {
                    Ok(())
                }
            }

            fn on_error(&self, _error: &TelemetryError, batch: &[TelemetryEvent]) {
                self.errors.fetch_add(batch.len(), Ordering::SeqCst);
            }
        }

        let sink = FailingSink {
            errors: Arc::clone(&errors),
        };
        let batcher = EventBatcher::new(config(2, 60_000), Arc::new(sink)).unwrap();

        for i in 0..4 {
            batcher.add(test_event(i)).await.unwrap();
        }

        let stats = batcher.statistics();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.flush_count, 2);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_sink_is_isolated() {
        let sink = FnSink::new(|batch: Vec<TelemetryEvent>| async move {
            if batch.len() == 1 {
                panic!("sink exploded");
            }
            Ok::<(), TelemetryError>(())
        });
        let batcher = EventBatcher::new(config(1, 60_000), Arc::new(sink)).unwrap();

        batcher.add(test_event(0)).await.unwrap();
        batcher.add(test_event(1)).await.unwrap();

        let stats = batcher.statistics();
        assert_eq!(stats.error_count, 2);
        assert_eq!(stats.total_events, 2);
    }

    #[tokio::test]
    async fn test_add_batch_splits_oversized_input() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(4, 60_000), Arc::new(sink)).unwrap();

        batcher
            .add_batch((0..10).map(test_event).collect())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(first[0].id, "evt_0");
        assert_eq!(second[0].id, "evt_4");
        assert_eq!(batcher.statistics().total_events, 10);
        assert_eq!(batcher.current_batch_size(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_rejects() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(10, 60_000), Arc::new(sink)).unwrap();

        batcher.add(test_event(1)).await.unwrap();
        batcher.add(test_event(2)).await.unwrap();
        batcher.shutdown().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 2);
        assert!(batcher.is_shutting_down());
        assert!(matches!(
            batcher.add(test_event(3)).await,
            Err(TelemetryError::ShuttingDown)
        ));
        assert!(matches!(
            batcher.add_batch(vec![test_event(4)]).await,
            Err(TelemetryError::ShuttingDown)
        ));

        // Second shutdown is a no-op
        batcher.shutdown().await.unwrap();
        assert_eq!(batcher.statistics().flush_count, 1);
        assert_eq!(batcher.statistics().total_events, 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_flush_discards() {
        let (sink, mut rx) = ChannelSink::new();
        let mut cfg = config(10, 60_000);
        cfg.flush_on_shutdown = false;
        let batcher = EventBatcher::new(cfg, Arc::new(sink)).unwrap();

        batcher.add(test_event(1)).await.unwrap();
        batcher.shutdown().await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.statistics().flush_count, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_triggers_shutdown() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(10, 60_000), Arc::new(sink)).unwrap();
        let lifecycle = Lifecycle::new();
        batcher.attach_shutdown(&lifecycle);

        batcher.add(test_event(1)).await.unwrap();
        lifecycle.shutdown();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batcher.is_shutting_down());
    }

    #[tokio::test]
    async fn test_concurrent_adds_keep_fifo_and_bounds() {
        let (sink, mut rx) = ChannelSink::new();
        let batcher = EventBatcher::new(config(5, 60_000), Arc::new(sink)).unwrap();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let b = batcher.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    b.add(test_event(worker * 100 + i)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        batcher.flush().await;

        let mut delivered = 0;
        while let Ok(batch) = rx.try_recv() {
            assert!(batch.len() <= 5);
            delivered += batch.len();
        }
        assert_eq!(delivered, 100);
        assert_eq!(batcher.statistics().total_events, 100);
    }

    #[test]
    fn test_invalid_config() {
        let (sink, _rx) = ChannelSink::new();
        assert!(EventBatcher::new(config(0, 10), Arc::new(sink)).is_err());
    }

    proptest! {
        #[test]
        fn prop_batches_bounded_and_events_accounted(
            max_batch_size in 1usize..20,
            chunks in proptest::collection::vec(0usize..30, 0..8),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let (sink, mut rx) = ChannelSink::new();
                let batcher =
                    EventBatcher::new(config(max_batch_size, 600_000), Arc::new(sink)).unwrap();

                let mut next = 0;
                let mut expected = 0u64;
                for (i, chunk) in chunks.iter().enumerate() {
                    let events: Vec<_> = (next..next + chunk).map(test_event).collect();
                    next += chunk;
                    expected += *chunk as u64;
                    if i % 2 == 0 {
                        batcher.add_batch(events).await.unwrap();
                    } else {
                        for event in events {
                            batcher.add(event).await.unwrap();
                        }
                    }
                    prop_assert!(batcher.current_batch_size() < max_batch_size);
                }

                let stats = batcher.statistics();
                prop_assert_eq!(stats.total_events, expected);

                batcher.flush().await;
                let mut delivered = Vec::new();
                while let Ok(batch) = rx.try_recv() {
                    prop_assert!(batch.len() <= max_batch_size);
                    delivered.extend(batch);
                }
                prop_assert_eq!(delivered.len() as u64, expected);
                // FIFO relative to arrival
                for (i, event) in delivered.iter().enumerate() {
                    prop_assert_eq!(event.timestamp, i as i64);
                }
                Ok(())
            })?;
        }
    }
}
