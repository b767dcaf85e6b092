use std::path::PathBuf;

use snafu::{Backtrace, Snafu};

/// Errors raised by a [`BarCache`](crate::cache::BarCache) implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CacheError {
    /// Nothing is stored for the requested partition.
    #[snafu(display("No cached data for {key}"))]
    Miss { key: String },

    /// A cache file exists but cannot be read back as bars.
    #[snafu(display("Corrupt cache file {}: {reason}", path.display()))]
    Corruption {
        path: PathBuf,
        reason: String,
        backtrace: Backtrace,
    },

    /// The partition key cannot be mapped to a path.
    #[snafu(display("Invalid cache key: {message}"))]
    InvalidKey {
        message: String,
        backtrace: Backtrace,
    },

    /// The series handed to `write` does not belong to the key's partition.
    #[snafu(display("Series {found} cannot be stored under {key}"))]
    KeyMismatch {
        key: String,
        found: String,
        backtrace: Backtrace,
    },

    /// A filesystem operation failed.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Encoding bars to CSV failed while writing.
    #[snafu(display("Failed to encode {}: {source}", path.display()))]
    Encode {
        path: PathBuf,
        source: csv::Error,
        backtrace: Backtrace,
    },

    /// Encoding the coverage sidecar failed while writing.
    #[snafu(display("Failed to encode {}: {source}", path.display()))]
    EncodeMeta {
        path: PathBuf,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}
