// src/replay/mod.rs
//! Offline replay of captured event streams
//!
//! - **Player**: paced re-emission with speed, seek, filter and loop controls
//! - **Recorder**: named sessions captured from live ingestion
//! - **Exporter**: session documents as JSON, JSON lines or YAML
//! - **Compressor**: zstd archival of exported documents
//!
//! Replay never touches live batching or analytics; feed its notifications
//! back into a pipeline explicitly if re-processing is wanted.

pub mod compressor;
pub mod exporter;
pub mod player;
pub mod recorder;

pub use compressor::{CompressionLevel, Compressor};
pub use exporter::{import_document, ExportFormat, SessionDocument, SessionExporter, SessionMetadata};
pub use player::{EventReplay, ReplayNotification, ReplayOptions, ReplayScope, ReplayState};
pub use recorder::ReplayRecorder;
