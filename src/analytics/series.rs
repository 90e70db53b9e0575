// src/analytics/series.rs
//! Length-capped time series

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A single time-series point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: i64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Series keyed by metric name
///
/// Each series keeps at most `max_points` points in insertion order; the
/// oldest inserted point is dropped first regardless of its timestamp. At
/// most `max_metrics` distinct names are tracked.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    max_points: usize,
    max_metrics: usize,
    series: HashMap<String, VecDeque<TimeSeriesPoint>>,
}

impl TimeSeriesStore {
    pub fn new(max_points: usize, max_metrics: usize) -> Self {
        Self {
            max_points,
            max_metrics,
            series: HashMap::new(),
        }
    }

    /// Append a point; returns false if the metric was rejected by the name cap
    pub fn record(&mut self, metric: &str, point: TimeSeriesPoint) -> bool {
        if !self.series.contains_key(metric) && self.series.len() >= self.max_metrics {
            return false;
        }

        let capacity = self.max_points.min(64);
        let series = self
            .series
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        series.push_back(point);
        while series.len() > self.max_points {
            series.pop_front();
        }
        true
    }

    /// Points for a metric, optionally restricted to `[start, end]`
    pub fn query(&self, metric: &str, start: Option<i64>, end: Option<i64>) -> Vec<TimeSeriesPoint> {
        self.series
            .get(metric)
            .map(|series| {
                series
                    .iter()
                    .filter(|p| start.map_or(true, |s| p.timestamp >= s))
                    .filter(|p| end.map_or(true, |e| p.timestamp <= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values in insertion order
    pub fn values(&self, metric: &str) -> Vec<f64> {
        self.series
            .get(metric)
            .map(|series| series.iter().map(|p| p.value).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, metric: &str) -> usize {
        self.series.get(metric).map_or(0, |s| s.len())
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metric_count(&self) -> usize {
        self.series.len()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}
