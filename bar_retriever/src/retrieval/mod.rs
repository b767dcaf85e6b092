//! Cache-aware historical bar retrieval.
//!
//! [`HistoricalRetriever::retrieve_bar_data`] runs one request through a fixed
//! sequence:
//!
//! 1. validate the request
//! 2. partition `[start, end)` into session dates of the market zone
//! 3. probe the cache for each date (only when `search_cache`)
//! 4. read every cache hit
//! 5. fetch each coalesced run of misses from the provider
//! 6. merge cached and fetched bars, fresher data winning
//! 7. persist every fetched unit under its own key in one batch (only when `store_to_cache`)
//!
//! Any failure aborts the request. Nothing is written unless every fetch succeeded.

pub mod plan;

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use snafu::ensure;
use tracing::{debug, info, instrument};

pub use plan::{FetchRun, RetrievalPlan, UnitStatus};

use crate::{
    cache::{BarCache, FsCacheStore},
    config::{OpenSessionPolicy, RetrieverConfig},
    errors::RetrievalError,
    models::{
        bar_series::BarSeries,
        bar_size::BarSize,
        request_params::{BarsRequest, FetchRequest},
    },
    providers::{ContractSnafu, MarketDataProvider, ProviderError},
    time_utils::{local_date, session_dates_between},
};

/// Source of "now", replaceable so tests can pin the current session.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Combines a [`BarCache`] with a [`MarketDataProvider`] so repeated requests
/// only hit the network for units that are not cached yet.
pub struct HistoricalRetriever {
    provider: Box<dyn MarketDataProvider>,
    cache: Arc<dyn BarCache>,
    config: RetrieverConfig,
    clock: Clock,
}

impl HistoricalRetriever {
    /// Creates a retriever backed by an [`FsCacheStore`] at `config.cache_root`.
    pub fn new(provider: Box<dyn MarketDataProvider>, config: RetrieverConfig) -> Self {
        let cache = Arc::new(FsCacheStore::from_config(&config));
        Self {
            provider,
            cache,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Swaps in another cache backend.
    pub fn with_cache(mut self, cache: Arc<dyn BarCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn BarCache> {
        &self.cache
    }

    /// Today's session date in the market zone.
    fn today(&self) -> NaiveDate {
        local_date((self.clock)(), self.config.market_timezone)
    }

    /// Decides hits, misses, and fetch runs without contacting the provider.
    pub fn plan_retrieval(&self, req: &BarsRequest) -> Result<RetrievalPlan, RetrievalError> {
        validate(req)?;
        let tz = self.config.market_timezone;
        let today = self.today();
        let refresh_open = self.config.open_session == OpenSessionPolicy::Refresh && !req.cache_only;

        let dates = session_dates_between(req.start, req.end, tz);
        let cached = if req.search_cache && !dates.is_empty() {
            self.cache.exists_units(&req.symbol, req.bar_size, &dates)?
        } else {
            vec![false; dates.len()]
        };

        let units = dates
            .into_iter()
            .zip(cached)
            .map(|(date, hit)| {
                let status = if !req.search_cache {
                    UnitStatus::Miss
                } else if refresh_open && date >= today {
                    UnitStatus::Refresh
                } else if hit {
                    UnitStatus::Hit
                } else {
                    UnitStatus::Miss
                };
                (date, status)
            })
            .collect();
        Ok(RetrievalPlan::new(&req.symbol, req.bar_size, units))
    }

    /// Returns the bars of every session in the request, from cache where
    /// possible and from the provider otherwise.
    ///
    /// Units are whole sessions: a daily request starting mid-morning still
    /// returns that day's bar, and the session containing `end` is excluded.
    #[instrument(skip(self, req), fields(symbol = %req.symbol, bar_size = %req.bar_size))]
    pub async fn retrieve_bar_data(&self, req: &BarsRequest) -> Result<BarSeries, RetrievalError> {
        let tz = self.config.market_timezone;
        let plan = self.plan_retrieval(req)?;
        info!(
            sessions = plan.units.len(),
            hits = plan.hits().len(),
            misses = plan.misses().len(),
            runs = plan.runs.len(),
            "retrieval planned"
        );
        debug!("\n{plan}");

        let hits = plan.hits();
        let mut result = if hits.is_empty() {
            BarSeries::with_as_of(&req.symbol, req.bar_size, DateTime::<Utc>::UNIX_EPOCH)
        } else {
            self.cache.read_units(&req.symbol, req.bar_size, &hits)?
        };

        if req.cache_only {
            debug!(skipped_runs = plan.runs.len(), "cache-only request, provider not contacted");
            return Ok(result);
        }

        let mut fetched: Vec<(FetchRun, BarSeries)> = Vec::with_capacity(plan.runs.len());
        for run in &plan.runs {
            let fetch_req = run.to_request(&req.symbol, req.bar_size, tz, req.include_after_hours)?;
            info!(start = %run.first, end = %run.last, "fetching from provider");
            let series = self.provider.fetch(&fetch_req).await?;
            check_contract(&fetch_req, &series, tz)?;
            debug!(bars = series.len(), "provider returned");
            fetched.push((*run, series));
        }

        let today = self.today();
        let mut to_persist: BTreeMap<NaiveDate, BarSeries> = BTreeMap::new();
        for (run, series) in fetched {
            if req.store_to_cache {
                let mut units = series.split_by_session(tz);
                for date in run.dates() {
                    if date >= today {
                        debug!(%date, "session may still be open, not cached");
                        continue;
                    }
                    let unit = units
                        .remove(&date)
                        .unwrap_or_else(|| BarSeries::with_as_of(&req.symbol, req.bar_size, series.as_of()));
                    to_persist.insert(date, unit);
                }
            }
            result = result.merge(series)?;
        }

        if !to_persist.is_empty() {
            debug!(units = to_persist.len(), "persisting fetched units");
            self.cache
                .write_units(&req.symbol, req.bar_size, &to_persist)?;
        }

        info!(bars = result.len(), "retrieval complete");
        Ok(result)
    }
}

/// Rejects requests the coordinator cannot serve.
pub fn validate(req: &BarsRequest) -> Result<(), RetrievalError> {
    if req.start >= req.end {
        return Err(RetrievalError::InvalidRange {
            start: req.start,
            end: req.end,
        });
    }
    if !req.bar_size.is_canonical() {
        return Err(RetrievalError::UnsupportedGranularity(req.bar_size));
    }
    if req.bar_size.is_intraday() {
        return Err(RetrievalError::NotImplemented(format!(
            "intraday retrieval ({}) is not supported yet",
            req.bar_size
        )));
    }
    Ok(())
}

/// Ensures a provider answer belongs to the request it was given for.
fn check_contract(
    req: &FetchRequest,
    series: &BarSeries,
    tz: chrono_tz::Tz,
) -> Result<(), ProviderError> {
    ensure!(
        series.symbol() == req.symbol && series.bar_size() == req.bar_size,
        ContractSnafu {
            message: format!(
                "asked for {}/{}, got {}/{}",
                req.symbol,
                req.bar_size,
                series.symbol(),
                series.bar_size()
            ),
        }
    );
    let size: BarSize = req.bar_size;
    if let Some(bar) = series.iter().find(|b| !req.contains(b.timestamp())) {
        return ContractSnafu {
            message: format!(
                "bar at {} outside [{}, {})",
                bar.timestamp(),
                req.start,
                req.end
            ),
        }
        .fail();
    }
    if let Some(bar) = series.iter().find(|b| !size.is_aligned(b.timestamp(), tz)) {
        return ContractSnafu {
            message: format!("bar at {} is not aligned to {size}", bar.timestamp()),
        }
        .fail();
    }
    Ok(())
}
