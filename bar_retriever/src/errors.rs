use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    cache::CacheError,
    config::ConfigError,
    models::{bar_series::BarSeriesError, bar_size::{BarSize, BarSizeError}},
    providers::ProviderError,
    time_utils::TimeError,
};

/// The unified error type for the `bar_retriever` crate.
///
/// Every variant aborts the request it was raised for; no partial results are
/// returned alongside an error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Invalid bar size: {0}")]
    InvalidBarSize(#[from] BarSizeError),

    /// `start` is not strictly before `end`.
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The bar size has no canonical cache label.
    #[error("Unsupported granularity: {0} has no canonical cache partition")]
    UnsupportedGranularity(BarSize),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A cache file exists but could not be decoded.
    #[error("Corrupt cache file {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    /// Writing the cache failed. Temp-then-rename keeps the failed write invisible.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other cache failure (bad key, encoding, ...).
    #[error("Cache error: {0}")]
    Cache(#[source] CacheError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Series error: {0}")]
    Series(#[from] BarSeriesError),

    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<CacheError> for RetrievalError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Corruption { path, reason, .. } => {
                RetrievalError::CacheCorruption { path, reason }
            }
            CacheError::Io { path, source, .. } => RetrievalError::Io { path, source },
            other => RetrievalError::Cache(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::{CorruptionSnafu, MissSnafu};

    #[test]
    fn cache_errors_map_to_request_errors() {
        let corrupt: RetrievalError = CorruptionSnafu {
            path: "/c/SPY/daily.csv",
            reason: "bad row",
        }
        .build()
        .into();
        assert!(matches!(
            corrupt,
            RetrievalError::CacheCorruption { ref reason, .. } if reason == "bad row"
        ));

        let miss: RetrievalError = MissSnafu { key: "SPY/1 day/2020-03-30" }.build().into();
        assert!(matches!(miss, RetrievalError::Cache(CacheError::Miss { .. })));
    }
}
