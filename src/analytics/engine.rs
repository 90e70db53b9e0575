// src/analytics/engine.rs
//! Analytics engine
//!
//! `process` is the single ingestion point. Each event is applied under one
//! write lock in three steps (counters, time series, buckets) so readers never
//! observe an event half-applied. Queries take the read lock and return owned
//! snapshots.

use crate::analytics::buckets::{BucketRecord, BucketStore, MetricBucket};
use crate::analytics::insights::{
    detect_spike, detect_trend, recommendations, Anomaly, Recommendation, Trend,
};
use crate::analytics::series::{TimeSeriesPoint, TimeSeriesStore};
use crate::events::{EventType, TelemetryEvent};
use crate::utils::errors::{Result, TelemetryError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Bucket width (milliseconds)
    pub bucket_width_ms: i64,

    /// Buckets retained per metric (1440 x 1 minute = 24h)
    pub retention_buckets: usize,

    /// Points retained per time series
    pub max_series_points: usize,

    /// Raw events retained for `get_metrics`
    pub max_window_events: usize,

    /// Distinct metric names per store
    pub max_metrics: usize,

    /// Trailing points compared against the latest point
    pub anomaly_window: usize,

    pub error_spike_multiplier: f64,
    pub duration_spike_multiplier: f64,

    pub trend_min_points: usize,

    /// `|slope|` below this is reported as stable
    pub trend_stable_threshold: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            bucket_width_ms: 60_000,
            retention_buckets: 1440,
            max_series_points: 1000,
            max_window_events: 1000,
            max_metrics: 10_000,
            anomaly_window: 10,
            error_spike_multiplier: 3.0,
            duration_spike_multiplier: 2.0,
            trend_min_points: 5,
            trend_stable_threshold: 0.01,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket_width_ms <= 0 {
            return Err(TelemetryError::ConfigError(
                "bucket_width_ms must be greater than 0".to_string(),
            ));
        }
        if self.retention_buckets == 0 || self.max_series_points == 0 || self.max_window_events == 0
        {
            return Err(TelemetryError::ConfigError(
                "retention_buckets, max_series_points and max_window_events must be greater than 0"
                    .to_string(),
            ));
        }
        if self.max_metrics == 0 {
            return Err(TelemetryError::ConfigError(
                "max_metrics must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

/// Distinct sessions in the window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub total: u64,
    /// `total - completed - errored`; negative when sessions both end and error
    pub active: i64,
    pub completed: u64,
    pub errored: u64,
}

/// Window metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsMetrics {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_category: BTreeMap<String, u64>,
    pub sessions: SessionMetrics,
    pub average_duration: f64,
    pub p95_duration: f64,
    pub error_count: u64,
    pub error_rate: f64,
    /// Running counters since the engine started
    pub counters: BTreeMap<String, u64>,
    pub time_range: Option<TimeRange>,
}

/// Options for `get_insights`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightOptions {
    pub time_range: Option<TimeRange>,
    pub include_anomalies: bool,
    pub include_trends: bool,
}

impl Default for InsightOptions {
    fn default() -> Self {
        Self {
            time_range: None,
            include_anomalies: true,
            include_trends: true,
        }
    }
}

/// Metrics plus derived analyses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub metrics: AnalyticsMetrics,
    pub anomalies: Vec<Anomaly>,
    pub trends: Vec<Trend>,
    pub recommendations: Vec<Recommendation>,
}

struct AnalyticsState {
    events: VecDeque<TelemetryEvent>,
    counters: HashMap<String, u64>,
    series: TimeSeriesStore,
    buckets: BucketStore,
    latest_timestamp: i64,
    rejected_metrics: HashSet<String>,
}

impl AnalyticsState {
    fn new(config: &AnalyticsConfig) -> Self {
        Self {
            events: VecDeque::with_capacity(config.max_window_events.min(1024)),
            counters: HashMap::new(),
            series: TimeSeriesStore::new(config.max_series_points, config.max_metrics),
            buckets: BucketStore::new(
                config.bucket_width_ms,
                config.retention_buckets,
                config.max_metrics,
            ),
            latest_timestamp: i64::MIN,
            rejected_metrics: HashSet::new(),
        }
    }

    fn reject(&mut self, metric: &str) {
        metrics::counter!("telemetry_metrics_rejected_total").increment(1);
        if self.rejected_metrics.insert(metric.to_string()) {
            warn!("Metric capacity reached; dropping metric '{}'", metric);
        }
    }
}

/// Rolling analytics over processed events
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    state: RwLock<AnalyticsState>,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "Analytics engine ready (bucket_width={}ms, retention={} buckets)",
            config.bucket_width_ms, config.retention_buckets
        );

        let state = RwLock::new(AnalyticsState::new(&config));
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Apply one event to counters, series and buckets
    pub fn process(&self, event: &TelemetryEvent) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        state.latest_timestamp = state.latest_timestamp.max(event.timestamp);
        state.events.push_back(event.clone());
        while state.events.len() > self.config.max_window_events {
            state.events.pop_front();
        }

        let is_error = event.event_type == EventType::Error;
        let event_type = event.event_type.as_str();
        let category = event.category.as_str();

        // Counters
        let mut counter_names = vec![
            "events.total".to_string(),
            format!("events.{}", event_type),
            format!("events.{}", category),
            format!("events.{}.{}", category, event.action),
        ];
        if is_error {
            counter_names.push("errors.total".to_string());
            counter_names.push(format!("errors.{}", category));
        }
        for name in counter_names {
            if let Some(count) = state.counters.get_mut(&name) {
                *count += 1;
            } else if state.counters.len() < self.config.max_metrics {
                state.counters.insert(name, 1);
            } else {
                state.reject(&name);
            }
        }

        // Series and buckets share names and values
        let mut samples: Vec<(String, f64)> = vec![
            ("events.rate".to_string(), 1.0),
            (format!("events.{}.rate", event_type), 1.0),
            (format!("events.{}.rate", category), 1.0),
        ];
        if is_error {
            samples.push(("errors.rate".to_string(), 1.0));
        }
        if let Some(duration) = event.duration {
            samples.push(("performance.duration".to_string(), duration));
            samples.push((format!("performance.{}.duration", category), duration));
        }

        for (name, value) in &samples {
            let mut point = TimeSeriesPoint::new(event.timestamp, *value);
            if name.starts_with("performance.") {
                point = point
                    .with_metadata("category", serde_json::json!(category))
                    .with_metadata("action", serde_json::json!(event.action));
            }
            if !state.series.record(name, point) {
                state.reject(name);
            }
        }

        let latest = state.latest_timestamp;
        for (name, value) in &samples {
            match state
                .buckets
                .record(name, event.timestamp, *value, &event.id, latest)
            {
                BucketRecord::Recorded | BucketRecord::Expired => {}
                BucketRecord::Rejected => state.reject(name),
            }
        }

        metrics::counter!("telemetry_events_processed_total").increment(1);
    }

    /// Process events in order
    pub fn process_all<'a>(&self, events: impl IntoIterator<Item = &'a TelemetryEvent>) {
        for event in events {
            self.process(event);
        }
    }

    /// Metrics over the retained window, optionally restricted to a time range
    pub fn get_metrics(&self, time_range: Option<TimeRange>) -> AnalyticsMetrics {
        let state = self.state.read();
        let range = time_range.unwrap_or_default();

        let mut metrics = AnalyticsMetrics {
            time_range,
            counters: state
                .counters
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            ..Default::default()
        };

        let mut sessions: HashSet<&str> = HashSet::new();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut errored: HashSet<&str> = HashSet::new();
        let mut durations: Vec<f64> = Vec::new();

        for event in state.events.iter().filter(|e| range.contains(e.timestamp)) {
            metrics.total_events += 1;
            *metrics
                .events_by_type
                .entry(event.event_type.to_string())
                .or_default() += 1;
            *metrics
                .events_by_category
                .entry(event.category.clone())
                .or_default() += 1;

            sessions.insert(&event.session_id);
            match event.event_type {
                EventType::End => {
                    completed.insert(&event.session_id);
                }
                EventType::Error => {
                    errored.insert(&event.session_id);
                    metrics.error_count += 1;
                }
                _ => {}
            }

            if let Some(duration) = event.duration {
                durations.push(duration);
            }
        }

        metrics.sessions = SessionMetrics {
            total: sessions.len() as u64,
            active: sessions.len() as i64 - completed.len() as i64 - errored.len() as i64,
            completed: completed.len() as u64,
            errored: errored.len() as u64,
        };

        if !durations.is_empty() {
            durations.sort_by(|a, b| a.total_cmp(b));
            metrics.average_duration = durations.iter().sum::<f64>() / durations.len() as f64;
            metrics.p95_duration = percentile(&durations, 0.95);
        }

        if metrics.total_events > 0 {
            metrics.error_rate = metrics.error_count as f64 / metrics.total_events as f64;
        }

        metrics
    }

    /// Metrics plus anomalies, trends and recommendations
    pub fn get_insights(&self, options: InsightOptions) -> Insights {
        let metrics = self.get_metrics(options.time_range);

        let (anomalies, trends) = {
            let state = self.state.read();
            let error_counts = state.buckets.counts("errors.rate");
            let event_counts = state.buckets.counts("events.rate");
            let durations = state.series.values("performance.duration");
            let last_duration_ts = state
                .series
                .query("performance.duration", None, None)
                .last()
                .map(|p| p.timestamp);
            let last_error_bucket = state
                .buckets
                .query("errors.rate", None, None)
                .last()
                .map(|b| b.timestamp);

            let mut anomalies = Vec::new();
            if options.include_anomalies {
                let window = self.config.anomaly_window;
                if let Some((value, baseline)) =
                    detect_spike(&error_counts, window, self.config.error_spike_multiplier)
                {
                    anomalies.push(Anomaly {
                        metric: "errors.rate".to_string(),
                        value,
                        baseline,
                        multiplier: self.config.error_spike_multiplier,
                        timestamp: last_error_bucket,
                    });
                }
                if let Some((value, baseline)) =
                    detect_spike(&durations, window, self.config.duration_spike_multiplier)
                {
                    anomalies.push(Anomaly {
                        metric: "performance.duration".to_string(),
                        value,
                        baseline,
                        multiplier: self.config.duration_spike_multiplier,
                        timestamp: last_duration_ts,
                    });
                }
            }

            let mut trends = Vec::new();
            if options.include_trends {
                let min_points = self.config.trend_min_points;
                let threshold = self.config.trend_stable_threshold;
                for (metric, values) in [
                    ("events.rate", &event_counts),
                    ("errors.rate", &error_counts),
                    ("performance.duration", &durations),
                ] {
                    if let Some(trend) = detect_trend(metric, values, min_points, threshold) {
                        trends.push(trend);
                    }
                }
            }

            (anomalies, trends)
        };

        let recommendations = recommendations(
            metrics.error_rate,
            metrics.average_duration,
            metrics.sessions.errored,
            metrics.sessions.completed,
        );

        Insights {
            metrics,
            anomalies,
            trends,
            recommendations,
        }
    }

    /// Points of one series
    pub fn get_time_series(&self, metric: &str, time_range: Option<TimeRange>) -> Vec<TimeSeriesPoint> {
        let range = time_range.unwrap_or_default();
        self.state.read().series.query(metric, range.start, range.end)
    }

    /// Buckets of one metric, oldest first
    pub fn get_bucket_data(&self, metric: &str, time_range: Option<TimeRange>) -> Vec<MetricBucket> {
        let range = time_range.unwrap_or_default();
        self.state.read().buckets.query(metric, range.start, range.end)
    }

    pub fn get_counters(&self) -> BTreeMap<String, u64> {
        self.state
            .read()
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Names of every tracked series
    pub fn get_metric_names(&self) -> Vec<String> {
        self.state.read().series.metric_names()
    }

    /// Raw events currently in the window
    pub fn window_len(&self) -> usize {
        self.state.read().events.len()
    }

    /// Drop all in-memory state
    pub fn reset(&self) {
        *self.state.write() = AnalyticsState::new(&self.config);
    }

    /// Clear all state; the engine keeps nothing durable
    pub fn shutdown(&self) {
        info!("Shutting down analytics engine");
        self.reset();
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
