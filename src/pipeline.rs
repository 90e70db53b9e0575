// src/pipeline.rs
//! Pipeline facade
//!
//! Wires the stages together for the common case:
//!
//! ```text
//! ingest(event) ──► filter.passes ──no──► Ok(false)
//!                        │ yes
//!                        ├──► batcher.add        (multi-channel, sink delivery)
//!                        ├──► analytics.process  (counters, series, buckets)
//!                        └──► recorder.record    (when a recorder is attached)
//! ```

use crate::analytics::{AnalyticsEngine, AnalyticsMetrics, InsightOptions, Insights, TimeRange};
use crate::batching::{BatchSink, BatchStatistics, MultiChannelBatcher, Router, DEFAULT_CHANNEL};
use crate::events::TelemetryEvent;
use crate::filter::EventFilter;
use crate::replay::{EventReplay, ReplayOptions, ReplayRecorder};
use crate::utils::config::{PipelineConfig, ReplayDefaults};
use crate::utils::errors::{Result, TelemetryError};
use crate::utils::shutdown::{Lifecycle, ShutdownHook};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Builder for [`TelemetryPipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    sink: Arc<dyn BatchSink>,
    filter: EventFilter,
    router: Option<Router>,
    recorder: Option<Arc<ReplayRecorder>>,
}

impl PipelineBuilder {
    /// Admission filter; without one every event passes
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Channel router; without one every event goes to the default channel
    pub fn router<F>(mut self, router: F) -> Self
    where
        F: Fn(&TelemetryEvent) -> String + Send + Sync + 'static,
    {
        self.router = Some(Arc::new(router));
        self
    }

    /// Capture admitted events into the recorder's active session
    pub fn recorder(mut self, recorder: Arc<ReplayRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> Result<TelemetryPipeline> {
        self.config.validate()?;

        let router: Router = match self.router {
            Some(router) => router,
            None => Arc::new(|_: &TelemetryEvent| DEFAULT_CHANNEL.to_string()),
        };
        let batcher = MultiChannelBatcher::new(
            self.config.channels.clone(),
            self.config.batcher.clone(),
            router,
            self.sink,
        )?;
        let analytics = AnalyticsEngine::new(self.config.analytics.clone())?;

        info!(
            "Telemetry pipeline ready ({} filter rules, recorder: {})",
            self.filter.rule_count(),
            self.recorder.is_some()
        );

        Ok(TelemetryPipeline {
            inner: Arc::new(PipelineInner {
                filter: self.filter,
                batcher,
                analytics,
                recorder: self.recorder,
                replay_defaults: self.config.replay,
                hook: Mutex::new(None),
            }),
        })
    }
}

struct PipelineInner {
    filter: EventFilter,
    batcher: MultiChannelBatcher,
    analytics: AnalyticsEngine,
    recorder: Option<Arc<ReplayRecorder>>,
    replay_defaults: ReplayDefaults,
    hook: Mutex<Option<ShutdownHook>>,
}

impl PipelineInner {
    async fn shutdown(&self) -> Result<()> {
        if let Some(hook) = self.hook.lock().take() {
            hook.detach();
        }

        if let Some(recorder) = &self.recorder {
            if let Some(session) = recorder.active_session() {
                warn!("Pipeline shutting down while session {} is recording", session);
            }
        }

        self.batcher.shutdown().await
    }
}

/// Filter, batching, analytics and optional recording behind one entry point
#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Arc<PipelineInner>,
}

impl TelemetryPipeline {
    pub fn builder(config: PipelineConfig, sink: Arc<dyn BatchSink>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            sink,
            filter: EventFilter::new(),
            router: None,
            recorder: None,
        }
    }

    /// Admit one event
    ///
    /// Returns `Ok(false)` when the filter rejects it and `ShuttingDown` once
    /// shutdown has begun. Sink failures are never surfaced here.
    pub async fn ingest(&self, event: TelemetryEvent) -> Result<bool> {
        if !self.inner.filter.passes(&event) {
            metrics::counter!("telemetry_events_filtered_total").increment(1);
            return Ok(false);
        }

        self.inner.batcher.add(event.clone()).await?;
        self.inner.analytics.process(&event);
        if let Some(recorder) = &self.inner.recorder {
            recorder.record(&event);
        }
        Ok(true)
    }

    /// Admit events in order; returns how many passed the filter
    pub async fn ingest_all(&self, events: Vec<TelemetryEvent>) -> Result<usize> {
        let mut admitted = 0;
        for event in events {
            if self.ingest(event).await? {
                admitted += 1;
            }
        }
        debug!("Ingested batch: {} admitted", admitted);
        Ok(admitted)
    }

    /// Deliver every partial batch now
    pub async fn flush(&self) {
        self.inner.batcher.flush_all().await;
    }

    pub fn metrics(&self, time_range: Option<TimeRange>) -> AnalyticsMetrics {
        self.inner.analytics.get_metrics(time_range)
    }

    pub fn insights(&self, options: InsightOptions) -> Insights {
        self.inner.analytics.get_insights(options)
    }

    pub fn statistics(&self) -> HashMap<String, BatchStatistics> {
        self.inner.batcher.get_all_statistics()
    }

    pub fn analytics(&self) -> &AnalyticsEngine {
        &self.inner.analytics
    }

    pub fn batcher(&self) -> &MultiChannelBatcher {
        &self.inner.batcher
    }

    pub fn recorder(&self) -> Option<&Arc<ReplayRecorder>> {
        self.inner.recorder.as_ref()
    }

    /// Replay a recorded session with the configured replay defaults
    pub fn replay_session(&self, session_id: &str) -> Result<EventReplay> {
        let recorder = self
            .inner
            .recorder
            .as_ref()
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;
        recorder.create_replay(session_id, ReplayOptions::from(&self.inner.replay_defaults))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.batcher.is_shutting_down()
    }

    /// Stop admitting events and drain the batchers
    ///
    /// Analytics state is kept so final insights can still be read.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down telemetry pipeline");
        self.inner.shutdown().await
    }

    /// Shut down when `lifecycle` is cancelled
    pub fn attach_shutdown(&self, lifecycle: &Lifecycle) {
        let weak: Weak<PipelineInner> = Arc::downgrade(&self.inner);
        let hook = lifecycle.register("pipeline", move || async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.shutdown().await {
                    warn!("Pipeline shutdown failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.inner.hook.lock().replace(hook) {
            previous.detach();
        }
    }
}
