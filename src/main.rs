// src/main.rs
//! Sentra Lab Telemetry Pipeline
//!
//! Reads JSON-lines telemetry events from stdin, runs them through the
//! pipeline and prints the final insights when input ends or a shutdown
//! signal arrives.
//!
//! Usage: `sentra-lab-telemetry [config.toml] < events.jsonl`

use anyhow::Result;
use futures::StreamExt;
use sentra_lab_telemetry::batching::{route_by_category, TracingSink};
use sentra_lab_telemetry::observability::{init_metrics, init_tracing};
use sentra_lab_telemetry::{
    InsightOptions, Lifecycle, PipelineConfig, TelemetryError, TelemetryEvent, TelemetryPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{error, info, warn};

/// Longest accepted input line
const MAX_LINE_BYTES: usize = 1 << 20;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())?;

    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!(
        "Starting Sentra Lab Telemetry Pipeline v{}",
        sentra_lab_telemetry::VERSION
    );

    let lifecycle = Lifecycle::new();
    let signals = lifecycle.listen_for_signals();

    let router = route_by_category();
    let pipeline = TelemetryPipeline::builder(config, Arc::new(TracingSink))
        .router(move |event: &TelemetryEvent| router(event))
        .build()?;
    pipeline.attach_shutdown(&lifecycle);

    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    );
    let mut line_no: u64 = 0;

    loop {
        tokio::select! {
            _ = lifecycle.cancelled() => {
                info!("Shutdown requested, stopping ingestion");
                break;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event: TelemetryEvent = match serde_json::from_str(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Skipping line {}: {}", line_no, e);
                            continue;
                        }
                    };
                    match pipeline.ingest(event).await {
                        Ok(_) => {}
                        Err(TelemetryError::ShuttingDown) => break,
                        Err(e) => warn!("Failed to ingest line {}: {}", line_no, e),
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    line_no += 1;
                    warn!("Skipping line {}: longer than {} bytes", line_no, MAX_LINE_BYTES);
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
                None => {
                    info!("End of input after {} lines", line_no);
                    break;
                }
            }
        }
    }

    pipeline.shutdown().await?;
    lifecycle.shutdown();
    if let Err(e) = signals.await {
        warn!("Signal listener ended abnormally: {}", e);
    }

    let insights = pipeline.insights(InsightOptions::default());
    info!(
        "Processed {} events ({} errors, {} anomalies, {} recommendations)",
        insights.metrics.total_events,
        insights.metrics.error_count,
        insights.anomalies.len(),
        insights.recommendations.len()
    );
    println!("{}", serde_json::to_string_pretty(&insights)?);

    Ok(())
}
