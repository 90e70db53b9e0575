// src/utils/mod.rs
//! Common utilities shared by every pipeline stage
//!
//! - **errors**: `TelemetryError` and the crate-wide `Result`
//! - **config**: layered pipeline configuration (file + environment)
//! - **shutdown**: lifecycle token handed down from the host process

pub mod config;
pub mod errors;
pub mod shutdown;

pub use config::PipelineConfig;
pub use errors::{Result, TelemetryError};
pub use shutdown::Lifecycle;
