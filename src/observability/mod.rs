// src/observability/mod.rs
//! Logging and metrics installation for the host process
//!
//! Library code only emits through `tracing` and `metrics` macros; nothing is
//! recorded until the host installs a subscriber and a recorder here.

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{Result, TelemetryError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Output goes to stderr so
/// stdout stays free for data.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TelemetryError::ObservabilityError(format!("log filter: {}", e)))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| TelemetryError::ObservabilityError(format!("tracing: {}", e)))
}

/// Install the Prometheus recorder when enabled
///
/// Must be called from within a tokio runtime; the scrape endpoint is served
/// by a background task.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if let Some(addr) = &config.listen_addr {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            TelemetryError::ObservabilityError(format!("metrics listen address {}: {}", addr, e))
        })?;
        builder = builder.with_http_listener(addr);
    }

    builder
        .install()
        .map_err(|e| TelemetryError::ObservabilityError(format!("prometheus: {}", e)))?;

    info!(
        "Prometheus exporter listening on {}",
        config.listen_addr.as_deref().unwrap_or("0.0.0.0:9000")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_listen_addr() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: Some("not an address".to_string()),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::ObservabilityError(_))
        ));
    }

    #[test]
    fn test_bad_log_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "telemetry=loudest".to_string(),
            json: false,
        };
        assert!(init_tracing(&config).is_err());
    }
}
