// src/batching/sink.rs
//! Downstream sink contract and adapters

use crate::events::TelemetryEvent;
use crate::utils::errors::{Result, TelemetryError};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Receives flushed batches
///
/// Errors returned from `on_batch` are isolated to that batch: the batcher
/// records them, calls `on_error`, and keeps accepting events.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver a batch downstream
    async fn on_batch(&self, batch: &[TelemetryEvent]) -> Result<()>;

    /// Called after `on_batch` failed for `batch`
    fn on_error(&self, error: &TelemetryError, batch: &[TelemetryEvent]) {
        error!("Failed to deliver batch of {} events: {}", batch.len(), error);
    }
}

/// Sink backed by an async closure
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Vec<TelemetryEvent>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> BatchSink for FnSink<F>
where
    F: Fn(Vec<TelemetryEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_batch(&self, batch: &[TelemetryEvent]) -> Result<()> {
        (self.f)(batch.to_vec()).await
    }
}

/// Forwards each batch into an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<TelemetryEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<TelemetryEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BatchSink for ChannelSink {
    async fn on_batch(&self, batch: &[TelemetryEvent]) -> Result<()> {
        self.tx
            .send(batch.to_vec())
            .map_err(|_| TelemetryError::SinkFailed("Receiver dropped".to_string()))
    }
}

/// Logs a one-line summary per batch
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl BatchSink for TracingSink {
    async fn on_batch(&self, batch: &[TelemetryEvent]) -> Result<()> {
        let first = batch.first().map(|e| e.timestamp).unwrap_or_default();
        let last = batch.last().map(|e| e.timestamp).unwrap_or_default();
        info!(
            "Batch of {} events spanning {}ms ({} -> {})",
            batch.len(),
            last - first,
            first,
            last
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        let event = TelemetryEvent::builder("s", EventType::Start, "c", "a").build();

        sink.on_batch(&[event.clone()]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_channel_sink_fails_when_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let result = sink.on_batch(&[]).await;
        assert!(matches!(result, Err(TelemetryError::SinkFailed(_))));
    }

    #[tokio::test]
    async fn test_fn_sink() {
        let sink = FnSink::new(|batch: Vec<TelemetryEvent>| async move {
            if batch.is_empty() {
                Err(TelemetryError::SinkFailed("empty".into()))
            } else {
                Ok(())
            }
        });
        assert!(sink.on_batch(&[]).await.is_err());
    }
}
