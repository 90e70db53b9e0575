// src/lib.rs
//! Sentra Lab Telemetry Pipeline
//!
//! Ingests discrete telemetry events emitted by a host application, filters
//! them, batches them for downstream delivery, computes rolling analytics and
//! supports deterministic replay of captured event streams.
//!
//! # Architecture
//!
//! - **events**: the immutable `TelemetryEvent` record
//! - **filter**: include/exclude rules and the predicate library
//! - **batching**: size/time-bounded batchers, multi-channel routing, sinks
//! - **analytics**: counters, time series, buckets, anomalies and trends
//! - **replay**: paced re-emission, session recording and export
//! - **pipeline**: facade wiring filter, batching, analytics and recording
//! - **observability**: tracing subscriber and Prometheus recorder setup
//! - **utils**: errors, configuration, lifecycle

pub mod analytics;
pub mod batching;
pub mod events;
pub mod filter;
pub mod observability;
pub mod pipeline;
pub mod replay;
pub mod utils;

// Re-export commonly used types
pub use analytics::{AnalyticsEngine, InsightOptions, Insights};
pub use batching::{BatchSink, EventBatcher, MultiChannelBatcher};
pub use events::{EventType, TelemetryEvent};
pub use filter::EventFilter;
pub use pipeline::TelemetryPipeline;
pub use replay::{EventReplay, ReplayRecorder};
pub use utils::config::PipelineConfig;
pub use utils::errors::{Result, TelemetryError};
pub use utils::shutdown::Lifecycle;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
