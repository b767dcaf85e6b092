#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bar_retriever::{
    Bar, BarSeries, BarSize, FetchRequest, HistoricalRetriever,
    cache::{BarCache, FsCacheStore, PartitionKey},
    config::RetrieverConfig,
    providers::{ApiSnafu, MarketDataProvider, ProviderError},
    time_utils::{session_dates_between, session_start},
};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tempfile::TempDir;

pub const NY: Tz = chrono_tz::America::New_York;

pub struct TestCache {
    _dir: TempDir,     // keep alive for the life of the test
    pub root: PathBuf, // <tmpdir>/cache
}

pub fn setup_cache() -> TestCache {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join("cache");
    TestCache { _dir: dir, root }
}

impl TestCache {
    pub fn store(&self) -> FsCacheStore {
        FsCacheStore::new(&self.root, NY)
    }

    pub fn config(&self) -> RetrieverConfig {
        RetrieverConfig::new(&self.root).with_market_timezone(NY)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Wall time in New York as UTC.
pub fn ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    NY.with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Deterministic daily bar for a session date.
pub fn daily_bar(date: NaiveDate) -> Bar {
    let px = 100.0 + date.ordinal() as f64 / 4.0;
    Bar::new(
        session_start(date, NY).unwrap(),
        px,
        px + 1.25,
        px - 0.75,
        px + 0.5,
        px + 0.1,
        1_000_000 + date.ordinal() as u64,
        5_000,
    )
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Writes weekday bars for `dates` through the public store API.
pub fn seed_daily(cache: &TestCache, symbol: &str, dates: &[NaiveDate]) {
    let store = cache.store();
    for date in dates {
        let mut unit = BarSeries::new(symbol, BarSize::day());
        if is_weekday(*date) {
            unit.add_bar(daily_bar(*date));
        }
        store
            .write(&PartitionKey::new(symbol, BarSize::day(), *date), &unit)
            .expect("seed");
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// One bar per weekday in the requested range.
    Weekdays,
    /// Succeeds for the first `n` calls, then fails.
    FailAfter(usize),
    /// Returns a bar stamped at the request's end.
    OutOfRange,
}

pub type CallLog = Arc<Mutex<Vec<FetchRequest>>>;

/// Provider double that records every request it receives.
pub struct RecordingProvider {
    behavior: Behavior,
    calls: CallLog,
}

impl RecordingProvider {
    pub fn new(behavior: Behavior) -> (Self, CallLog) {
        let calls = CallLog::default();
        (
            Self {
                behavior,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl MarketDataProvider for RecordingProvider {
    async fn fetch(&self, req: &FetchRequest) -> Result<BarSeries, ProviderError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(req.clone());
            calls.len()
        };

        let mut series = BarSeries::new(req.symbol.clone(), req.bar_size);
        match self.behavior {
            Behavior::FailAfter(n) if call_no > n => {
                return ApiSnafu {
                    status: 500u16,
                    message: "upstream exploded",
                }
                .fail();
            }
            Behavior::OutOfRange => {
                let mut bar_date = session_dates_between(req.start, req.end, NY);
                let after = bar_date.pop().unwrap().succ_opt().unwrap();
                series.add_bar(daily_bar(after));
            }
            Behavior::Weekdays | Behavior::FailAfter(_) => {
                series.extend(
                    session_dates_between(req.start, req.end, NY)
                        .into_iter()
                        .filter(|d| is_weekday(*d))
                        .map(daily_bar),
                );
            }
        }
        Ok(series)
    }
}

/// Retriever over `cache` whose clock is pinned to `now`.
pub fn retriever(
    cache: &TestCache,
    behavior: Behavior,
    now: DateTime<Utc>,
) -> (HistoricalRetriever, CallLog) {
    let (provider, calls) = RecordingProvider::new(behavior);
    let r = HistoricalRetriever::new(Box::new(provider), cache.config()).with_clock(move || now);
    (r, calls)
}

/// Session dates each recorded call covered.
pub fn fetched_dates(calls: &CallLog) -> Vec<NaiveDate> {
    calls
        .lock()
        .unwrap()
        .iter()
        .flat_map(|r| session_dates_between(r.start, r.end, NY))
        .collect()
}
