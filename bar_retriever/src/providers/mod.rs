//! Provider abstraction for market data sources.
//!
//! [`MarketDataProvider`] is the only way the retrieval coordinator reaches a
//! vendor. An implementation receives one [`FetchRequest`] per contiguous run of
//! missing cache units and must return bars strictly inside `[start, end)`.
//!
//! The trait is async and object safe, so a retriever can hold any provider as
//! `Box<dyn MarketDataProvider>`.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use bar_retriever::models::{bar_series::BarSeries, request_params::FetchRequest};
//! use bar_retriever::providers::{MarketDataProvider, ProviderError};
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl MarketDataProvider for Offline {
//!     async fn fetch(&self, req: &FetchRequest) -> Result<BarSeries, ProviderError> {
//!         Ok(BarSeries::new(req.symbol.clone(), req.bar_size))
//!     }
//! }
//! ```

pub mod alpaca_rest;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{bar_series::BarSeries, request_params::FetchRequest};

/// Fetches historical bars for a single symbol from a market data vendor.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches all bars of `req.bar_size` for `req.symbol` in `[req.start, req.end)`.
    async fn fetch(&self, req: &FetchRequest) -> Result<BarSeries, ProviderError>;
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// API key contains invalid characters.
    #[snafu(display("Invalid API key format: {source}"))]
    InvalidApiKey {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a `MarketDataProvider` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The provider's API returned an error status.
    #[snafu(display("API error ({status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this specific provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// The provider returned data that breaks the fetch contract
    /// (bars outside the requested range or off the bar grid).
    #[snafu(display("Provider broke the fetch contract: {message}"))]
    Contract {
        message: String,
        backtrace: Backtrace,
    },

    /// An internal error occurred while processing data within the provider.
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}
