use std::fmt;

use chrono::{NaiveDate, TimeDelta};
use chrono_tz::Tz;

use crate::{
    models::{bar_size::BarSize, request_params::FetchRequest},
    time_utils::{TimeError, session_start},
};

/// Cache verdict for one partition unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Stored and trusted; read from the cache.
    Hit,
    /// Not stored, or the cache was not consulted.
    Miss,
    /// Possibly stored, but the session may still be open so it is fetched again.
    Refresh,
}

impl UnitStatus {
    pub fn needs_fetch(self) -> bool {
        !matches!(self, UnitStatus::Hit)
    }
}

/// An inclusive run of consecutive dates fetched with one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRun {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl FetchRun {
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.first.iter_days().take_while(|d| *d <= self.last)
    }

    /// The provider request covering every session of the run.
    pub fn to_request(
        &self,
        symbol: &str,
        bar_size: BarSize,
        tz: Tz,
        include_after_hours: bool,
    ) -> Result<FetchRequest, TimeError> {
        Ok(FetchRequest {
            symbol: symbol.to_string(),
            start: session_start(self.first, tz)?,
            end: session_start(self.last + TimeDelta::days(1), tz)?,
            bar_size,
            include_after_hours,
        })
    }
}

/// What one retrieval will read from the cache and what it will fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPlan {
    pub symbol: String,
    pub bar_size: BarSize,
    /// Every partition unit of the request, ascending by date.
    pub units: Vec<(NaiveDate, UnitStatus)>,
    /// Maximal runs of consecutive units that need fetching.
    pub runs: Vec<FetchRun>,
}

impl RetrievalPlan {
    /// Builds a plan from per-date verdicts. `units` must be ascending.
    pub fn new(
        symbol: impl Into<String>,
        bar_size: BarSize,
        units: Vec<(NaiveDate, UnitStatus)>,
    ) -> Self {
        let mut runs: Vec<FetchRun> = Vec::new();
        for (date, status) in &units {
            if !status.needs_fetch() {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.last.succ_opt() == Some(*date) => run.last = *date,
                _ => runs.push(FetchRun {
                    first: *date,
                    last: *date,
                }),
            }
        }
        Self {
            symbol: symbol.into(),
            bar_size,
            units,
            runs,
        }
    }

    pub fn hits(&self) -> Vec<NaiveDate> {
        self.dates_where(|s| s == UnitStatus::Hit)
    }

    /// Dates that will be fetched, forced refreshes included.
    pub fn misses(&self) -> Vec<NaiveDate> {
        self.dates_where(UnitStatus::needs_fetch)
    }

    pub fn refreshes(&self) -> Vec<NaiveDate> {
        self.dates_where(|s| s == UnitStatus::Refresh)
    }

    /// True when every unit is served from the cache.
    pub fn is_noop(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn fetch_requests(
        &self,
        tz: Tz,
        include_after_hours: bool,
    ) -> Result<Vec<FetchRequest>, TimeError> {
        self.runs
            .iter()
            .map(|run| run.to_request(&self.symbol, self.bar_size, tz, include_after_hours))
            .collect()
    }

    fn dates_where(&self, mut pred: impl FnMut(UnitStatus) -> bool) -> Vec<NaiveDate> {
        self.units
            .iter()
            .filter(|(_, s)| pred(*s))
            .map(|(d, _)| *d)
            .collect()
    }
}

impl fmt::Display for RetrievalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("{} @ {}", self.symbol, self.bar_size);
        writeln!(f, "{title}")?;
        for _ in 0..title.chars().count() {
            write!(f, "-")?;
        }
        writeln!(f)?;

        if self.units.is_empty() {
            return write!(f, "No sessions in range");
        }
        writeln!(
            f,
            "{} cached, {} to fetch ({} refreshed)",
            self.hits().len(),
            self.misses().len(),
            self.refreshes().len()
        )?;
        if self.is_noop() {
            return write!(f, "No fetches");
        }
        for run in &self.runs {
            if run.first == run.last {
                writeln!(f, "+ {}", run.first)?;
            } else {
                writeln!(f, "+ {} .. {}", run.first, run.last)?;
            }
        }
        Ok(())
    }
}
