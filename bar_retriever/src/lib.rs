//! Historical bar retrieval backed by an on-disk cache.
//!
//! A [`HistoricalRetriever`] answers [`BarsRequest`]s by reading whole session
//! units from a [`BarCache`](cache::BarCache) and fetching only the missing ones
//! from a [`MarketDataProvider`](providers::MarketDataProvider).

pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod retrieval;
pub mod time_utils;

pub use errors::RetrievalError;
pub use models::{
    bar::Bar,
    bar_series::BarSeries,
    bar_size::BarSize,
    request_params::{BarsRequest, FetchRequest},
};
pub use retrieval::HistoricalRetriever;
