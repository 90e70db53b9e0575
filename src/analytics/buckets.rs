// src/analytics/buckets.rs
//! Fixed-width time buckets

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Aggregate of one metric over one time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBucket {
    pub metric: String,

    /// Window start, `floor(timestamp / width) * width`
    pub timestamp: i64,

    pub width_ms: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,

    /// Contributing event ids; always `count` long
    pub events: Vec<String>,
}

impl MetricBucket {
    fn new(metric: &str, timestamp: i64, width_ms: i64) -> Self {
        Self {
            metric: metric.to_string(),
            timestamp,
            width_ms,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            events: Vec::new(),
        }
    }

    fn add(&mut self, value: f64, event_id: &str) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.events.push(event_id.to_string());
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn end(&self) -> i64 {
        self.timestamp + self.width_ms
    }
}

/// Outcome of `BucketStore::record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketRecord {
    Recorded,
    /// Older than the retention horizon
    Expired,
    /// New metric name beyond the name cap
    Rejected,
}

/// Buckets keyed by metric name, then window start
#[derive(Debug, Clone)]
pub struct BucketStore {
    width_ms: i64,
    retention_buckets: i64,
    max_metrics: usize,
    buckets: HashMap<String, BTreeMap<i64, MetricBucket>>,
}

impl BucketStore {
    pub fn new(width_ms: i64, retention_buckets: usize, max_metrics: usize) -> Self {
        Self {
            width_ms: width_ms.max(1),
            retention_buckets: retention_buckets as i64,
            max_metrics,
            buckets: HashMap::new(),
        }
    }

    pub fn bucket_start(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.width_ms) * self.width_ms
    }

    /// Oldest window start still retained when the newest event is at `latest`
    fn horizon(&self, latest: i64) -> i64 {
        self.bucket_start(latest) - (self.retention_buckets - 1) * self.width_ms
    }

    /// Add `value` to the bucket containing `timestamp` and prune that metric
    pub fn record(
        &mut self,
        metric: &str,
        timestamp: i64,
        value: f64,
        event_id: &str,
        latest: i64,
    ) -> BucketRecord {
        let start = self.bucket_start(timestamp);
        let horizon = self.horizon(latest);
        if start < horizon {
            return BucketRecord::Expired;
        }

        if !self.buckets.contains_key(metric) && self.buckets.len() >= self.max_metrics {
            return BucketRecord::Rejected;
        }

        let width = self.width_ms;
        let series = self.buckets.entry(metric.to_string()).or_default();
        series
            .entry(start)
            .or_insert_with(|| MetricBucket::new(metric, start, width))
            .add(value, event_id);

        // Drop everything before the horizon
        let retained = series.split_off(&horizon);
        *series = retained;

        BucketRecord::Recorded
    }

    /// Buckets of a metric overlapping `[start, end]`, oldest first
    pub fn query(&self, metric: &str, start: Option<i64>, end: Option<i64>) -> Vec<MetricBucket> {
        self.buckets
            .get(metric)
            .map(|series| {
                series
                    .values()
                    .filter(|b| start.map_or(true, |s| b.end() > s))
                    .filter(|b| end.map_or(true, |e| b.timestamp <= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-window counts from the oldest to the newest bucket, oldest first
    ///
    /// Windows with no bucket between the two count as zero.
    pub fn counts(&self, metric: &str) -> Vec<f64> {
        let Some(series) = self.buckets.get(metric) else {
            return Vec::new();
        };
        let (Some(first), Some(last)) = (series.keys().next(), series.keys().next_back()) else {
            return Vec::new();
        };

        let windows = ((last - first) / self.width_ms + 1) as usize;
        let mut counts = vec![0.0; windows];
        for (start, bucket) in series {
            counts[((start - first) / self.width_ms) as usize] = bucket.count as f64;
        }
        counts
    }

    pub fn bucket_count(&self, metric: &str) -> usize {
        self.buckets.get(metric).map_or(0, |s| s.len())
    }

    pub fn metric_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_aggregates() {
        let mut store = BucketStore::new(60_000, 1440, 100);
        store.record("perf", 1_000, 10.0, "a", 1_000);
        store.record("perf", 59_999, 30.0, "b", 59_999);
        store.record("perf", 60_000, 5.0, "c", 60_000);

        let buckets = store.query("perf", None, None);
        assert_eq!(buckets.len(), 2);

        let first = &buckets[0];
        assert_eq!(first.timestamp, 0);
        assert_eq!(first.count, 2);
        assert_eq!(first.sum, 40.0);
        assert_eq!(first.min, 10.0);
        assert_eq!(first.max, 30.0);
        assert_eq!(first.average(), 20.0);
        assert_eq!(first.events, vec!["a", "b"]);
        assert_eq!(first.count as usize, first.events.len());

        assert_eq!(buckets[1].timestamp, 60_000);
    }

    #[test]
    fn test_retention_prunes_old_buckets() {
        let mut store = BucketStore::new(1_000, 3, 100);
        for ts in [0, 1_000, 2_000, 3_000, 4_500] {
            store.record("m", ts, 1.0, "e", ts);
        }
        // Latest window is 4000; three windows retained: 2000, 3000, 4000
        let starts: Vec<i64> = store.query("m", None, None).iter().map(|b| b.timestamp).collect();
        assert_eq!(starts, vec![2_000, 3_000, 4_000]);

        // Late event beyond the horizon is not recorded
        assert_eq!(store.record("m", 500, 1.0, "late", 4_500), BucketRecord::Expired);
        assert_eq!(store.bucket_count("m"), 3);
    }

    #[test]
    fn test_negative_timestamps_floor() {
        let store = BucketStore::new(1_000, 10, 10);
        assert_eq!(store.bucket_start(-1), -1_000);
        assert_eq!(store.bucket_start(999), 0);
    }

    #[test]
    fn test_metric_cap() {
        let mut store = BucketStore::new(1_000, 10, 1);
        assert_eq!(store.record("a", 0, 1.0, "e", 0), BucketRecord::Recorded);
        assert_eq!(store.record("b", 0, 1.0, "e", 0), BucketRecord::Rejected);
        assert_eq!(store.counts("a"), vec![1.0]);
    }

    #[test]
    fn test_counts_fill_quiet_windows() {
        let mut store = BucketStore::new(1_000, 100, 10);
        store.record("m", 0, 1.0, "a", 0);
        store.record("m", 100, 1.0, "b", 100);
        store.record("m", 3_500, 1.0, "c", 3_500);

        assert_eq!(store.counts("m"), vec![2.0, 0.0, 0.0, 1.0]);
        assert_eq!(store.bucket_count("m"), 2);
        assert!(store.counts("missing").is_empty());
    }
}
