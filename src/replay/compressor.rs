// src/replay/compressor.rs
//! zstd compression for archived sessions

use crate::utils::errors::{Result, TelemetryError};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// zstd level 1
    Fast,

    /// zstd level 3
    #[default]
    Balanced,

    /// zstd level 19
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// zstd compressor for exported session documents
#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = zstd::encode_all(data, self.level.as_i32())
            .map_err(|e| TelemetryError::CompressionFailed(format!("compress: {}", e)))?;

        debug!(
            "Compressed session {} -> {} bytes ({:?})",
            data.len(),
            compressed.len(),
            self.level
        );

        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decompressed = zstd::decode_all(data)
            .map_err(|e| TelemetryError::CompressionFailed(format!("decompress: {}", e)))?;

        debug!(
            "Decompressed session {} -> {} bytes",
            data.len(),
            decompressed.len()
        );

        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(CompressionLevel::Fast.as_i32(), 1);
        assert_eq!(CompressionLevel::default().as_i32(), 3);
        assert_eq!(CompressionLevel::Best.as_i32(), 19);
    }

    #[test]
    fn test_session_json_shrinks() {
        let compressor = Compressor::default();
        let json = r#"{"id":"01H","sessionId":"s1","eventType":"stream","category":"llm"}"#.repeat(500);

        let compressed = compressor.compress(json.as_bytes()).unwrap();
        assert!(compressed.len() * 5 < json.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), json.as_bytes());
    }

    #[test]
    fn test_garbage_input_fails() {
        let err = Compressor::default().decompress(b"not zstd").unwrap_err();
        assert!(matches!(err, TelemetryError::CompressionFailed(_)));
    }
}
