// src/compression/mod.rs
//! Compression utilities for repodata files
//!
//! Conda clients look for `repodata.json.bz2` next to `repodata.json`, so the
//! only codec the mirror writes is bzip2.

use bzip2::Compression;
use bzip2::read::{BzDecoder, BzEncoder};
use std::io::{self, Read};
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to compress {format} data: {source}")]
    Compression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },
}

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Bzip2 compression (.bz2)
    Bzip2,
}

impl CompressionFormat {
    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bzip2 => "bzip2",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compress a byte slice using the specified format
pub fn compress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    let result = match format {
        CompressionFormat::Bzip2 => {
            BzEncoder::new(data, Compression::best()).read_to_end(&mut output)
        }
    };
    result.map_err(|e| CompressionError::Compression {
        format: format.name(),
        source: e,
    })?;
    Ok(output)
}

/// Decompress a byte slice using the specified format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    let result = match format {
        CompressionFormat::Bzip2 => BzDecoder::new(data).read_to_end(&mut output),
    };
    result.map_err(|e| CompressionError::Decompression {
        format: format.name(),
        source: e,
    })?;
    Ok(output)
}
