// src/error.rs

//! Error types for the mirror engine
//!
//! Fetch and config errors abort a platform pass (or the whole run for
//! config errors). Download, size and checksum errors are scoped to a single
//! package and are collected into the run summary by the reconciler.

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration; raised before any network activity
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Retrieving or decoding an upstream repodata.json failed
    #[error("Failed to fetch repodata: {0}")]
    FetchError(String),

    /// Transferring a single package failed
    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl Error {
    /// Whether this error only affects one package rather than a whole platform
    pub fn is_package_scoped(&self) -> bool {
        matches!(
            self,
            Error::DownloadError(_) | Error::ChecksumMismatch { .. } | Error::SizeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_scoped_errors() {
        assert!(Error::DownloadError("HTTP 404".to_string()).is_package_scoped());
        assert!(Error::SizeMismatch { expected: 10, actual: 3 }.is_package_scoped());
        assert!(!Error::FetchError("timeout".to_string()).is_package_scoped());
        assert!(!Error::ConfigError("missing channel".to_string()).is_package_scoped());
    }

    #[test]
    fn test_display() {
        let err = Error::ChecksumMismatch {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected abc, got def");
    }
}
