// src/utils/config.rs
//! Pipeline configuration
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults (`Default` impls on every section)
//! 2. Optional file (TOML, YAML or JSON, chosen by extension)
//! 3. Environment variables prefixed with `TELEMETRY__`, using `__` as the
//!    section separator (e.g. `TELEMETRY__BATCHER__MAX_BATCH_SIZE=500`)

use crate::analytics::AnalyticsConfig;
use crate::batching::{BatcherConfig, MultiChannelConfig};
use crate::utils::errors::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batcher: BatcherConfig,
    pub channels: MultiChannelConfig,
    pub analytics: AnalyticsConfig,
    pub replay: ReplayDefaults,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Defaults applied to replays created without explicit options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayDefaults {
    pub speed: f64,
    pub preserve_timing: bool,
    pub loop_playback: bool,
}

impl Default for ReplayDefaults {
    fn default() -> Self {
        Self {
            speed: 1.0,
            preserve_timing: true,
            loop_playback: false,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Listen address for the scrape endpoint (exporter default when unset)
    pub listen_addr: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TELEMETRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.batcher.validate()?;

        if self.channels.max_channels == 0 {
            return Err(TelemetryError::ConfigError(
                "max_channels must be greater than 0".to_string(),
            ));
        }

        self.analytics.validate()?;

        if self.replay.speed <= 0.0 || !self.replay.speed.is_finite() {
            return Err(TelemetryError::InvalidSpeed(self.replay.speed));
        }

        Ok(())
    }
}
