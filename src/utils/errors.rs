// src/utils/errors.rs
//! Error types for the telemetry pipeline

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors surfaced by the pipeline components
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Mutating call after `shutdown()` began
    #[error("Batcher is shutting down")]
    ShuttingDown,

    /// `configure_channel` called twice for the same key
    #[error("Channel already configured: {0}")]
    ChannelExists(String),

    /// Explicit channel registration beyond `max_channels`
    #[error("Channel limit reached ({0} channels)")]
    ChannelLimitReached(usize),

    /// Downstream sink rejected a batch
    #[error("Sink failed: {0}")]
    SinkFailed(String),

    /// Replay speed must be strictly positive
    #[error("Invalid replay speed: {0}")]
    InvalidSpeed(f64),

    /// Seek target outside the replay window
    #[error("Seek timestamp {timestamp} outside replay window [{start}, {end}]")]
    SeekOutOfRange { timestamp: i64, start: i64, end: i64 },

    /// Unknown recorded session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// `start_recording` while another recording is active
    #[error("Already recording session: {0}")]
    AlreadyRecording(String),

    /// `stop_recording` without an active recording
    #[error("No active recording")]
    NotRecording,

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Observability setup failed: {0}")]
    ObservabilityError(String),
}

impl TelemetryError {
    /// Configuration-class errors fail fast and leave state unchanged
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TelemetryError::ConfigError(_)
                | TelemetryError::ChannelExists(_)
                | TelemetryError::ChannelLimitReached(_)
                | TelemetryError::InvalidSpeed(_)
                | TelemetryError::SeekOutOfRange { .. }
                | TelemetryError::SessionNotFound(_)
        )
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        TelemetryError::ExportFailed(format!("JSON error: {}", e))
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(e: config::ConfigError) -> Self {
        TelemetryError::ConfigError(e.to_string())
    }
}
