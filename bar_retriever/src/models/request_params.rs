use chrono::{DateTime, Utc};

use crate::models::bar_size::BarSize;

/// Caller-facing parameters for [`retrieve_bar_data`](crate::retrieval::HistoricalRetriever::retrieve_bar_data).
///
/// Built with [`BarsRequest::new`] and refined with the chained setters:
///
/// ```
/// use bar_retriever::models::{bar_size::BarSize, request_params::BarsRequest};
/// use chrono::{TimeZone, Utc};
///
/// let req = BarsRequest::new(
///     "SPY",
///     Utc.with_ymd_and_hms(2020, 3, 30, 13, 0, 0).unwrap(),
///     Utc.with_ymd_and_hms(2020, 4, 3, 20, 30, 0).unwrap(),
///     BarSize::day(),
/// )
/// .store_to_cache(false);
/// assert!(req.search_cache);
/// assert!(!req.store_to_cache);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct BarsRequest {
    pub symbol: String,

    /// Start of the requested range (inclusive).
    pub start: DateTime<Utc>,

    /// End of the requested range (exclusive).
    pub end: DateTime<Utc>,

    pub bar_size: BarSize,

    /// Include bars outside regular trading hours. Passed through to the provider.
    pub include_after_hours: bool,

    /// Probe the cache before fetching. When false every unit is fetched.
    pub search_cache: bool,

    /// Persist fetched units once the whole request succeeded.
    pub store_to_cache: bool,

    /// Never contact the provider; units missing from the cache are left out.
    pub cache_only: bool,
}

impl BarsRequest {
    pub fn new(
        symbol: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bar_size: BarSize,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            bar_size,
            include_after_hours: false,
            search_cache: true,
            store_to_cache: true,
            cache_only: false,
        }
    }

    pub fn include_after_hours(mut self, value: bool) -> Self {
        self.include_after_hours = value;
        self
    }

    pub fn search_cache(mut self, value: bool) -> Self {
        self.search_cache = value;
        self
    }

    pub fn store_to_cache(mut self, value: bool) -> Self {
        self.store_to_cache = value;
        self
    }

    pub fn cache_only(mut self, value: bool) -> Self {
        self.cache_only = value;
        self
    }
}

/// A single provider call covering one contiguous run of missing units.
///
/// Providers must return only bars with `start <= timestamp < end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bar_size: BarSize,
    pub include_after_hours: bool,
}

impl FetchRequest {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults() {
        let start = Utc.with_ymd_and_hms(2020, 3, 30, 13, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 4, 3, 20, 30, 0).unwrap();
        let req = BarsRequest::new("SPY", start, end, BarSize::day());
        assert!(!req.include_after_hours);
        assert!(req.search_cache);
        assert!(req.store_to_cache);
        assert!(!req.cache_only);

        let req = req.cache_only(true).search_cache(false).include_after_hours(true);
        assert!(req.cache_only && !req.search_cache && req.include_after_hours);
    }

    #[test]
    fn test_fetch_request_bounds_are_half_open() {
        let start = Utc.with_ymd_and_hms(2020, 3, 30, 4, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 3, 31, 4, 0, 0).unwrap();
        let req = FetchRequest {
            symbol: "SPY".into(),
            start,
            end,
            bar_size: BarSize::day(),
            include_after_hours: false,
        };
        assert!(req.contains(start));
        assert!(!req.contains(end));
    }
}
