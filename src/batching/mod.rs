// src/batching/mod.rs
//! Size/time-bounded event batching
//!
//! - **EventBatcher**: accumulates admitted events and flushes them to a sink
//!   when the batch is full or its first event has waited `max_wait_time`
//! - **MultiChannelBatcher**: one batcher per routing key, capped at
//!   `max_channels`, with a shared default batcher for overflow keys
//! - **BatchSink**: downstream delivery contract
//!
//! # Flow
//!
//! ```text
//! add(event) ──► active batch ──(full | timer | flush | shutdown)──► pending queue
//!                                                                      │
//!                                        delivery lock (one in flight) ▼
//!                                                         sink.on_batch(batch)
//!                                                                      │
//!                                              Err / panic ──► error_count++, sink.on_error
//! ```

pub mod batcher;
pub mod multi_channel;
pub mod sink;

pub use batcher::{BatchStatistics, BatcherConfig, EventBatcher};
pub use multi_channel::{
    route_by_category, route_by_event_type, route_by_session, MultiChannelBatcher,
    MultiChannelConfig, Router, DEFAULT_CHANNEL,
};
pub use sink::{BatchSink, ChannelSink, FnSink, TracingSink};
