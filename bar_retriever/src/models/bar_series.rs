//! A collection of time-series bars for a specific symbol and bar size.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::models::{bar::Bar, bar_size::BarSize};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarSeriesError {
    #[error("Cannot merge series {found} into {expected}")]
    SeriesMismatch { expected: String, found: String },
}

/// A bar together with the moment the data was obtained.
#[derive(Debug, Clone)]
struct Stamped {
    as_of: DateTime<Utc>,
    bar: Bar,
}

/// Ordered, deduplicated bars for one `(symbol, BarSize)` pair.
///
/// Bars are keyed by timestamp; inserting a bar at an existing timestamp
/// replaces it. Every bar also carries the `as_of` stamp of the series it was
/// added through, which [`BarSeries::merge`] uses to prefer fresher data.
/// Equality compares symbol, bar size and bar values, not stamps.
#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    bar_size: BarSize,
    as_of: DateTime<Utc>,
    bars: BTreeMap<DateTime<Utc>, Stamped>,
}

impl BarSeries {
    /// Creates an empty series stamped with the current time.
    pub fn new(symbol: impl Into<String>, bar_size: BarSize) -> Self {
        Self::with_as_of(symbol, bar_size, Utc::now())
    }

    /// Creates an empty series whose bars will be stamped with `as_of`.
    pub fn with_as_of(symbol: impl Into<String>, bar_size: BarSize, as_of: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            bar_size,
            as_of,
            bars: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bar_size(&self) -> BarSize {
        self.bar_size
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    /// Inserts a bar, replacing any bar already stored at the same timestamp.
    pub fn add_bar(&mut self, bar: Bar) {
        self.bars.insert(
            bar.timestamp(),
            Stamped {
                as_of: self.as_of,
                bar,
            },
        );
    }

    /// Number of distinct timestamps.
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&Bar> {
        self.bars.get(&timestamp).map(|s| &s.bar)
    }

    /// Bars in ascending timestamp order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Bar> + '_ {
        self.bars.values().map(|s| &s.bar)
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.values().next().map(|s| &s.bar)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.values().next_back().map(|s| &s.bar)
    }

    /// Bars with `start <= timestamp < end`.
    pub fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl DoubleEndedIterator<Item = &Bar> + '_ {
        // BTreeMap::range panics on an inverted range.
        let end = end.max(start);
        self.bars.range(start..end).map(|(_, s)| &s.bar)
    }

    /// Distinct session dates covered by the bars, in `tz`.
    pub fn session_dates(&self, tz: Tz) -> BTreeSet<NaiveDate> {
        self.iter().map(|b| b.session_date(tz)).collect()
    }

    /// Keeps only the bars whose session date in `tz` satisfies `keep`.
    pub fn retain_dates(&mut self, tz: Tz, mut keep: impl FnMut(NaiveDate) -> bool) {
        self.bars.retain(|_, s| keep(s.bar.session_date(tz)));
    }

    /// A copy holding only the bars whose session date is in `dates`.
    pub fn filter_sessions(&self, tz: Tz, dates: &BTreeSet<NaiveDate>) -> Self {
        let bars = self
            .bars
            .iter()
            .filter(|(_, s)| dates.contains(&s.bar.session_date(tz)))
            .map(|(ts, s)| (*ts, s.clone()))
            .collect();
        Self {
            symbol: self.symbol.clone(),
            bar_size: self.bar_size,
            as_of: self.as_of,
            bars,
        }
    }

    /// Splits the series into one series per session date, stamps preserved.
    pub fn split_by_session(&self, tz: Tz) -> BTreeMap<NaiveDate, BarSeries> {
        let mut out: BTreeMap<NaiveDate, BarSeries> = BTreeMap::new();
        for (ts, stamped) in &self.bars {
            out.entry(stamped.bar.session_date(tz))
                .or_insert_with(|| Self::with_as_of(self.symbol.clone(), self.bar_size, self.as_of))
                .bars
                .insert(*ts, stamped.clone());
        }
        out
    }

    /// Combines two series of the same symbol and bar size.
    ///
    /// On a timestamp collision the bar with the later `as_of` wins; equal
    /// stamps resolve to `other`. This keeps merging associative and makes
    /// merging a series with itself, or with an empty series, a no-op.
    pub fn merge(mut self, other: BarSeries) -> Result<BarSeries, BarSeriesError> {
        if self.symbol != other.symbol || self.bar_size != other.bar_size {
            return Err(BarSeriesError::SeriesMismatch {
                expected: format!("{}/{}", self.symbol, self.bar_size),
                found: format!("{}/{}", other.symbol, other.bar_size),
            });
        }
        for (ts, incoming) in other.bars {
            match self.bars.get(&ts) {
                Some(existing) if existing.as_of > incoming.as_of => {}
                _ => {
                    self.bars.insert(ts, incoming);
                }
            }
        }
        Ok(self)
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars.into_values().map(|s| s.bar).collect()
    }
}

impl PartialEq for BarSeries {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.bar_size == other.bar_size
            && self.bars.len() == other.bars.len()
            && self.iter().eq(other.iter())
    }
}

impl Extend<Bar> for BarSeries {
    fn extend<I: IntoIterator<Item = Bar>>(&mut self, iter: I) {
        for bar in iter {
            self.add_bar(bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn bar_at(day: u32, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2020, 3, day, 4, 0, 0).unwrap();
        Bar::new(ts, close, close + 1.0, close - 1.0, close, close, 1_000, 10)
    }

    fn series(as_of_secs: i64, bars: &[Bar]) -> BarSeries {
        let as_of = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(as_of_secs);
        let mut s = BarSeries::with_as_of("SPY", BarSize::day(), as_of);
        s.extend(bars.iter().cloned());
        s
    }

    #[test]
    fn test_new_series_is_empty() {
        let s = BarSeries::new("SPY", BarSize::minutes(5).unwrap());
        assert_eq!(s.len(), 0);
        assert!(s.is_empty());
        assert_eq!(s.bar_size(), BarSize::minutes(5).unwrap());
    }

    #[test]
    fn test_same_timestamp_last_write_wins() {
        let mut s = BarSeries::new("SPY", BarSize::day());
        let b1 = bar_at(30, 100.0);
        let b2 = bar_at(30, 101.0);
        s.add_bar(b1);
        s.add_bar(b2.clone());
        assert_eq!(s.len(), 1);
        assert_eq!(s.first(), Some(&b2));
    }

    #[test]
    fn test_iteration_is_ascending() {
        let s = series(0, &[bar_at(31, 2.0), bar_at(27, 1.0), bar_at(30, 3.0)]);
        let days: Vec<_> = s.iter().map(|b| b.timestamp()).collect();
        let mut sorted = days.clone();
        sorted.sort();
        assert_eq!(days, sorted);
        assert_eq!(s.last().unwrap().close(), 2.0);
    }

    #[test]
    fn test_range_is_half_open() {
        let s = series(0, &[bar_at(26, 1.0), bar_at(27, 2.0), bar_at(30, 3.0)]);
        let start = Utc.with_ymd_and_hms(2020, 3, 26, 4, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 3, 30, 4, 0, 0).unwrap();
        assert_eq!(s.range(start, end).count(), 2);
        assert_eq!(s.range(end, start).count(), 0);
    }

    #[test]
    fn test_merge_prefers_fresher_data_regardless_of_order() {
        let stale = series(10, &[bar_at(30, 100.0), bar_at(31, 100.0)]);
        let fresh = series(20, &[bar_at(31, 200.0)]);

        let a = stale.clone().merge(fresh.clone()).unwrap();
        let b = fresh.merge(stale).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.last().unwrap().close(), 200.0);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_merge_with_self_and_empty_is_noop() {
        let s = series(10, &[bar_at(30, 100.0), bar_at(31, 101.0)]);
        assert_eq!(s.clone().merge(s.clone()).unwrap(), s);
        assert_eq!(s.clone().merge(series(99, &[])).unwrap(), s);
        assert_eq!(series(99, &[]).merge(s.clone()).unwrap(), s);
    }

    #[test]
    fn test_merge_rejects_other_bar_size() {
        let daily = series(0, &[]);
        let intraday = BarSeries::new("SPY", BarSize::minutes(1).unwrap());
        assert!(matches!(
            daily.merge(intraday),
            Err(BarSeriesError::SeriesMismatch { .. })
        ));
    }

    #[test]
    fn test_split_and_filter_by_session() {
        let tz = chrono_tz::America::New_York;
        let s = series(0, &[bar_at(26, 1.0), bar_at(27, 2.0), bar_at(30, 3.0)]);
        let parts = s.split_by_session(tz);
        assert_eq!(parts.len(), 3);
        assert!(parts.values().all(|p| p.len() == 1));

        let wanted = BTreeSet::from([NaiveDate::from_ymd_opt(2020, 3, 27).unwrap()]);
        let only = s.filter_sessions(tz, &wanted);
        assert_eq!(only.len(), 1);
        assert_eq!(only.first().unwrap().close(), 2.0);

        let mut weekdays = s.clone();
        let cutoff = NaiveDate::from_ymd_opt(2020, 3, 28).unwrap();
        weekdays.retain_dates(tz, |d| d < cutoff);
        assert_eq!(weekdays.len(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_series() -> impl Strategy<Value = BarSeries> {
            (0i64..3, proptest::collection::vec((1u32..=28, 1u32..500), 0..8)).prop_map(
                |(as_of, raw)| {
                    let bars: Vec<Bar> = raw
                        .into_iter()
                        .map(|(day, px)| {
                            let ts = Utc.with_ymd_and_hms(2021, 2, day, 5, 0, 0).unwrap();
                            let px = px as f64;
                            Bar::new(ts, px, px, px, px, px, px as u64, 1)
                        })
                        .collect();
                    series(as_of, &bars)
                },
            )
        }

        proptest! {
            #[test]
            fn merge_is_associative(a in arb_series(), b in arb_series(), c in arb_series()) {
                let left = a.clone().merge(b.clone()).unwrap().merge(c.clone()).unwrap();
                let right = a.merge(b.merge(c).unwrap()).unwrap();
                prop_assert_eq!(left, right);
            }

            #[test]
            fn merge_is_idempotent(a in arb_series()) {
                prop_assert_eq!(a.clone().merge(a.clone()).unwrap(), a);
            }
        }
    }
}
