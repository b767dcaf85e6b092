use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::models::bar::Bar;

#[derive(Deserialize, Debug)]
pub struct AlpacaBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: u64,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "vw")]
    pub vwap: f64,
}

impl From<AlpacaBar> for Bar {
    fn from(ab: AlpacaBar) -> Self {
        Bar::new(
            ab.timestamp,
            ab.open,
            ab.high,
            ab.low,
            ab.close,
            ab.vwap,
            ab.volume,
            ab.trade_count,
        )
    }
}

#[derive(Deserialize, Debug)]
pub struct AlpacaResponse {
    /// Alpaca sends `null` instead of `{}` when a page has no bars.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub bars: IndexMap<String, Vec<AlpacaBar>>,
    pub next_page_token: Option<String>,
}

fn null_as_empty<'de, D>(d: D) -> Result<IndexMap<String, Vec<AlpacaBar>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(d)?.unwrap_or_default())
}
