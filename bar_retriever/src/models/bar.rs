//! Canonical in-memory representation of a time-series bar (OHLCV).
//!
//! This struct is the output of every [`MarketDataProvider`](crate::providers::MarketDataProvider)
//! and the row type of the on-disk cache.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A single time-series bar (OHLCV) for a given timestamp.
///
/// Fields are private so a bar cannot change after construction; a bar is
/// identified by its timestamp inside a [`BarSeries`](crate::models::bar_series::BarSeries).
/// The serde names match the cache CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(rename = "wap")]
    vwap: f64,
    volume: u64,
    #[serde(rename = "count")]
    trade_count: u64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        vwap: f64,
        volume: u64,
        trade_count: u64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            vwap,
            volume,
            trade_count,
        }
    }

    /// The timestamp for this bar (UTC).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Opening price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Highest price during the bar interval.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Lowest price during the bar interval.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Closing price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Volume-weighted average price.
    pub fn vwap(&self) -> f64 {
        self.vwap
    }

    /// Volume traded during the bar interval.
    pub fn volume(&self) -> u64 {
        self.volume
    }

    /// Number of trades in the bar interval.
    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// Session date of the bar in the market time zone.
    pub fn session_date(&self, tz: Tz) -> NaiveDate {
        self.timestamp.with_timezone(&tz).date_naive()
    }
}
