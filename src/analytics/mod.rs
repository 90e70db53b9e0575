// src/analytics/mod.rs
//! Rolling analytics over the admitted event stream
//!
//! - **Engine**: single ingestion point updating counters, time series and buckets
//! - **Series**: per-metric, length-capped point sequences (FIFO eviction)
//! - **Buckets**: fixed-width time windows with count/sum/min/max
//! - **Insights**: spike detection, linear-regression trends, recommendations
//!
//! # Metric names
//!
//! ```text
//! counters   events.total  events.<type>  events.<category>  events.<category>.<action>
//!            errors.total  errors.<category>
//! series /   events.rate  events.<type>.rate  events.<category>.rate  errors.rate
//! buckets    performance.duration  performance.<category>.duration
//! ```

pub mod buckets;
pub mod engine;
pub mod insights;
pub mod series;

pub use buckets::{BucketStore, MetricBucket};
pub use engine::{
    AnalyticsConfig, AnalyticsEngine, AnalyticsMetrics, InsightOptions, Insights, SessionMetrics,
    TimeRange,
};
pub use insights::{Anomaly, Recommendation, Severity, Trend, TrendDirection};
pub use series::{TimeSeriesPoint, TimeSeriesStore};
