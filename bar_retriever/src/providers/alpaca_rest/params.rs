use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::{
    models::{
        bar_size::{BarSize, SECS_PER_HOUR, SECS_PER_MINUTE},
        request_params::FetchRequest,
    },
    providers::{ProviderError, ValidationSnafu},
};

/// Largest page Alpaca serves for the bars endpoint.
pub const MAX_PAGE_LIMIT: u32 = 10_000;

/// Specifies the corporate action adjustment for stock data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    #[default]
    Raw,
    Split,
    Dividend,
    All,
}

/// Specifies the source feed for stock data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    #[default]
    Sip,
    Iex,
    Otc,
}

/// Alpaca-specific knobs applied to every request a provider makes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AlpacaBarsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Adjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<Feed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Adjustment {
    fn as_str(self) -> &'static str {
        match self {
            Adjustment::Raw => "raw",
            Adjustment::Split => "split",
            Adjustment::Dividend => "dividend",
            Adjustment::All => "all",
        }
    }
}

impl Feed {
    fn as_str(self) -> &'static str {
        match self {
            Feed::Sip => "sip",
            Feed::Iex => "iex",
            Feed::Otc => "otc",
        }
    }
}

/// Maps a bar size onto Alpaca's `timeframe` query value.
///
/// Alpaca accepts `[1-59]Min`, `[1-23]Hour` and `1Day`; anything else,
/// including every sub-minute size, is rejected.
pub fn alpaca_timeframe(bar_size: BarSize) -> Result<String, ProviderError> {
    if bar_size.is_daily() {
        return Ok("1Day".to_string());
    }
    let secs = bar_size.duration().num_seconds();
    ensure!(
        bar_size.duration().subsec_nanos() == 0 && secs % SECS_PER_MINUTE == 0,
        ValidationSnafu {
            message: format!("Alpaca does not serve {bar_size} bars"),
        }
    );
    if secs % SECS_PER_HOUR == 0 {
        Ok(format!("{}Hour", secs / SECS_PER_HOUR))
    } else {
        Ok(format!("{}Min", secs / SECS_PER_MINUTE))
    }
}

/// Builds the query string pairs for one page of a bars request.
pub fn construct_params(
    req: &FetchRequest,
    extra: &AlpacaBarsParams,
) -> Result<Vec<(String, String)>, ProviderError> {
    let limit = extra.limit.unwrap_or(MAX_PAGE_LIMIT);
    ensure!(
        (1..=MAX_PAGE_LIMIT).contains(&limit),
        ValidationSnafu {
            message: format!("limit must be within 1..={MAX_PAGE_LIMIT}, got {limit}"),
        }
    );

    let mut params = vec![
        ("symbols".to_string(), req.symbol.clone()),
        ("timeframe".to_string(), alpaca_timeframe(req.bar_size)?),
        ("start".to_string(), req.start.to_rfc3339()),
        ("end".to_string(), req.end.to_rfc3339()),
        ("limit".to_string(), limit.to_string()),
        ("sort".to_string(), "asc".to_string()),
    ];
    if let Some(adjustment) = extra.adjustment {
        params.push(("adjustment".to_string(), adjustment.as_str().to_string()));
    }
    if let Some(feed) = extra.feed {
        params.push(("feed".to_string(), feed.as_str().to_string()));
    }
    Ok(params)
}
