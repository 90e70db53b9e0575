// src/replay/exporter.rs
//! Session documents and their renderings
//!
//! The canonical document is the JSON form
//! `{ sessionId, events, metadata: { recordedAt, eventCount, duration } }`.
//! JSON lines and YAML are provided for external tooling; only the JSON
//! document is accepted back by `import_document`.

use crate::events::TelemetryEvent;
use crate::replay::compressor::Compressor;
use crate::utils::errors::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Derived session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Epoch milliseconds when the session was stored
    pub recorded_at: i64,
    pub event_count: usize,
    /// Last minus first event timestamp (ms)
    pub duration: i64,
}

/// A recorded session as exchanged with the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub session_id: String,
    pub events: Vec<TelemetryEvent>,
    pub metadata: SessionMetadata,
}

impl SessionDocument {
    pub fn new(session_id: impl Into<String>, events: Vec<TelemetryEvent>, recorded_at: i64) -> Self {
        let duration = match (events.first(), events.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        };
        let metadata = SessionMetadata {
            recorded_at,
            event_count: events.len(),
            duration,
        };
        Self {
            session_id: session_id.into(),
            events,
            metadata,
        }
    }
}

/// Parse a JSON session document
///
/// Fails when `sessionId` is missing or not a string, or when `events` is not
/// an array. Missing metadata is derived from the events.
pub fn import_document(json: &str) -> Result<SessionDocument> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| TelemetryError::ImportFailed(format!("invalid JSON: {}", e)))?;

    let session_id = value
        .get("sessionId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TelemetryError::ImportFailed("missing sessionId".to_string()))?
        .to_string();

    let events = value
        .get("events")
        .filter(|v| v.is_array())
        .cloned()
        .ok_or_else(|| TelemetryError::ImportFailed("events must be an array".to_string()))?;
    let events: Vec<TelemetryEvent> = serde_json::from_value(events)
        .map_err(|e| TelemetryError::ImportFailed(format!("invalid event: {}", e)))?;

    let recorded_at = value
        .pointer("/metadata/recordedAt")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Ok(SessionDocument::new(session_id, events, recorded_at))
}

/// Output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty JSON document
    Json,

    /// One event per line, no envelope
    JsonLines,

    /// YAML document
    Yaml,
}

/// Renders session documents
pub struct SessionExporter {
    format: ExportFormat,
}

impl SessionExporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn export(&self, document: &SessionDocument) -> Result<String> {
        debug!(
            "Exporting session {} ({} events) as {:?}",
            document.session_id,
            document.events.len(),
            self.format
        );

        match self.format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(document)?),
            ExportFormat::JsonLines => {
                let mut out = String::new();
                for event in &document.events {
                    out.push_str(&serde_json::to_string(event)?);
                    out.push('\n');
                }
                Ok(out)
            }
            ExportFormat::Yaml => serde_yaml::to_string(document)
                .map_err(|e| TelemetryError::ExportFailed(format!("YAML serialization: {}", e))),
        }
    }

    /// Compact JSON document compressed with zstd
    pub fn export_compressed(document: &SessionDocument, compressor: &Compressor) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(document)?;
        compressor.compress(&json)
    }

    pub fn import_compressed(data: &[u8], compressor: &Compressor) -> Result<SessionDocument> {
        let json = compressor.decompress(data)?;
        let json = String::from_utf8(json)
            .map_err(|e| TelemetryError::ImportFailed(format!("invalid UTF-8: {}", e)))?;
        import_document(&json)
    }
}
