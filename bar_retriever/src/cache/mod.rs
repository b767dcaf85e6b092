//! On-disk bar cache.
//!
//! The [`BarCache`] trait is the seam between the retrieval coordinator and
//! storage. [`FsCacheStore`] is the filesystem implementation: daily bars of a
//! symbol live in one CSV with a coverage sidecar, intraday bars in one CSV per
//! `(bar size, date)`. See [`layout`] for the exact paths.

pub mod csv_io;
pub mod errors;
pub mod layout;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use snafu::{ResultExt, ensure};
use tracing::debug;

pub use errors::CacheError;
pub use layout::{CacheLayout, PartitionKey};

use crate::{
    cache::{
        csv_io::{CoverageMeta, ensure_dates, read_meta, read_series, write_meta, write_series},
        errors::{IoSnafu, KeyMismatchSnafu, MissSnafu},
        layout::intraday_file_date,
    },
    config::RetrieverConfig,
    models::{bar_series::BarSeries, bar_size::BarSize},
};

/// Storage for cached bar units, keyed by [`PartitionKey`].
pub trait BarCache: Send + Sync {
    /// Whether the unit has been stored, even if it holds no bars.
    fn exists(&self, key: &PartitionKey) -> Result<bool, CacheError>;

    /// Reads one unit. Absent units fail with [`CacheError::Miss`].
    fn read(&self, key: &PartitionKey) -> Result<BarSeries, CacheError>;

    /// Merges `series` into the unit at `key`, creating it if needed.
    fn write(&self, key: &PartitionKey, series: &BarSeries) -> Result<(), CacheError>;

    /// Probes several units of one symbol and bar size; `result[i]` answers `dates[i]`.
    fn exists_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        dates: &[NaiveDate],
    ) -> Result<Vec<bool>, CacheError> {
        dates
            .iter()
            .map(|date| self.exists(&PartitionKey::new(symbol, bar_size, *date)))
            .collect()
    }

    /// Reads several units of one symbol and bar size into a single series.
    fn read_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        dates: &[NaiveDate],
    ) -> Result<BarSeries, CacheError> {
        let mut out = BarSeries::with_as_of(symbol, bar_size, DateTime::<Utc>::UNIX_EPOCH);
        for date in dates {
            let key = PartitionKey::new(symbol, bar_size, *date);
            let unit = self.read(&key)?;
            out = merge_into(&key, out, unit)?;
        }
        Ok(out)
    }

    /// Writes several units of one symbol and bar size, one per date.
    fn write_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        units: &BTreeMap<NaiveDate, BarSeries>,
    ) -> Result<(), CacheError> {
        for (date, unit) in units {
            self.write(&PartitionKey::new(symbol, bar_size, *date), unit)?;
        }
        Ok(())
    }
}

/// Filesystem-backed [`BarCache`].
///
/// Writes to one file are serialized through a per-path lock; replacement is an
/// atomic rename, so concurrent readers never observe a partial file. Batched
/// operations on daily data touch `daily.csv` and its sidecar once per call.
#[derive(Debug)]
pub struct FsCacheStore {
    layout: CacheLayout,
    tz: Tz,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsCacheStore {
    /// Creates a store rooted at `root`; session dates are taken in `tz`.
    pub fn new(root: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            layout: CacheLayout::new(root),
            tz,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RetrieverConfig) -> Self {
        Self::new(cfg.cache_root.clone(), cfg.market_timezone)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn market_timezone(&self) -> Tz {
        self.tz
    }

    /// Dates stored for `symbol` at `bar_size`, including dates stored without bars.
    pub fn cached_dates(
        &self,
        symbol: &str,
        bar_size: BarSize,
    ) -> Result<BTreeSet<NaiveDate>, CacheError> {
        if bar_size.is_daily() {
            return Ok(self.read_daily(symbol, bar_size)?.1);
        }

        let dir = self.layout.intraday_dir(symbol, bar_size)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e).context(IoSnafu { path: dir }),
        };
        let mut dates = BTreeSet::new();
        for entry in entries {
            let entry = entry.context(IoSnafu { path: &dir })?;
            if let Some(date) = intraday_file_date(&entry.path()) {
                dates.insert(date);
            }
        }
        Ok(dates)
    }

    /// Runs `f` while holding the write lock for `path`.
    ///
    /// The table entry is removed by whichever holder finishes last.
    fn with_path_lock<T>(
        &self,
        path: &Path,
        f: impl FnOnce() -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
        result
    }

    /// The daily file (if any) and every date it covers, bars or sidecar.
    fn read_daily(
        &self,
        symbol: &str,
        bar_size: BarSize,
    ) -> Result<(Option<BarSeries>, BTreeSet<NaiveDate>), CacheError> {
        let series = read_series(&self.layout.daily_path(symbol)?, symbol, bar_size)?;
        let CoverageMeta { mut dates } = read_meta(&self.layout.daily_meta_path(symbol)?)?;
        if let Some(series) = &series {
            dates.extend(series.session_dates(self.tz));
        }
        Ok((series, dates))
    }

    fn check_unit(&self, key: &PartitionKey, series: &BarSeries) -> Result<(), CacheError> {
        let found = format!("{}/{}", series.symbol(), series.bar_size());
        ensure!(
            series.symbol() == key.symbol && series.bar_size() == key.bar_size,
            KeyMismatchSnafu {
                key: key.to_string(),
                found,
            }
        );
        let stray = series
            .session_dates(self.tz)
            .into_iter()
            .find(|d| *d != key.date);
        ensure!(
            stray.is_none(),
            KeyMismatchSnafu {
                key: key.to_string(),
                found: format!("{found} with bars on {stray:?}"),
            }
        );
        Ok(())
    }

    /// Merges every unit into `daily.csv` with one rewrite, then records the dates.
    fn write_daily<'a>(
        &self,
        symbol: &str,
        bar_size: BarSize,
        units: impl IntoIterator<Item = (NaiveDate, &'a BarSeries)>,
    ) -> Result<(), CacheError> {
        let units: Vec<(PartitionKey, &BarSeries)> = units
            .into_iter()
            .map(|(date, unit)| (PartitionKey::new(symbol, bar_size, date), unit))
            .collect();
        if units.is_empty() {
            return Ok(());
        }
        for (key, unit) in &units {
            self.check_unit(key, unit)?;
        }

        let path = self.layout.daily_path(symbol)?;
        self.with_path_lock(&path, || {
            let mut merged = read_series(&path, symbol, bar_size)?
                .unwrap_or_else(|| BarSeries::with_as_of(symbol, bar_size, DateTime::<Utc>::UNIX_EPOCH));
            let mut bars = 0;
            for (key, unit) in &units {
                bars += unit.len();
                merged = merge_into(key, merged, (*unit).clone())?;
            }
            write_series(&path, &merged)?;

            // Bars first, coverage second: a crash in between only costs a refetch.
            let meta_path = self.layout.daily_meta_path(symbol)?;
            let mut meta = read_meta(&meta_path)?;
            let known = meta.dates.len();
            meta.dates.extend(units.iter().map(|(key, _)| key.date));
            if meta.dates.len() != known {
                write_meta(&meta_path, &meta)?;
            }

            debug!(
                symbol,
                %bar_size,
                units = units.len(),
                bars,
                path = %path.display(),
                "cached daily units written"
            );
            Ok(())
        })
    }

    fn write_intraday(&self, key: &PartitionKey, series: &BarSeries) -> Result<(), CacheError> {
        self.check_unit(key, series)?;
        let path = self.layout.intraday_path(key)?;
        self.with_path_lock(&path, || {
            let existing = read_series(&path, &key.symbol, key.bar_size)?.unwrap_or_else(|| {
                BarSeries::with_as_of(&key.symbol, key.bar_size, DateTime::<Utc>::UNIX_EPOCH)
            });
            let merged = merge_into(key, existing, series.clone())?;
            write_series(&path, &merged)?;
            debug!(%key, bars = series.len(), path = %path.display(), "cached unit written");
            Ok(())
        })
    }
}

impl BarCache for FsCacheStore {
    fn exists(&self, key: &PartitionKey) -> Result<bool, CacheError> {
        if key.bar_size.is_daily() {
            let (_, covered) = self.read_daily(&key.symbol, key.bar_size)?;
            return Ok(covered.contains(&key.date));
        }
        let path = self.layout.intraday_path(key)?;
        path.try_exists().context(IoSnafu { path: &path })
    }

    fn read(&self, key: &PartitionKey) -> Result<BarSeries, CacheError> {
        self.read_units(&key.symbol, key.bar_size, &[key.date])
    }

    fn write(&self, key: &PartitionKey, series: &BarSeries) -> Result<(), CacheError> {
        if key.bar_size.is_daily() {
            self.write_daily(&key.symbol, key.bar_size, [(key.date, series)])
        } else {
            self.write_intraday(key, series)
        }
    }

    fn exists_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        dates: &[NaiveDate],
    ) -> Result<Vec<bool>, CacheError> {
        if !bar_size.is_daily() {
            return dates
                .iter()
                .map(|date| self.exists(&PartitionKey::new(symbol, bar_size, *date)))
                .collect();
        }
        let (_, covered) = self.read_daily(symbol, bar_size)?;
        Ok(dates.iter().map(|d| covered.contains(d)).collect())
    }

    fn read_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        dates: &[NaiveDate],
    ) -> Result<BarSeries, CacheError> {
        if bar_size.is_daily() {
            let (series, covered) = self.read_daily(symbol, bar_size)?;
            if let Some(missing) = dates.iter().find(|d| !covered.contains(d)) {
                return MissSnafu {
                    key: PartitionKey::new(symbol, bar_size, *missing).to_string(),
                }
                .fail();
            }
            let wanted: BTreeSet<NaiveDate> = dates.iter().copied().collect();
            let mut out = series.unwrap_or_else(|| BarSeries::new(symbol, bar_size));
            out.retain_dates(self.tz, |d| wanted.contains(&d));
            return Ok(out);
        }

        let mut out = BarSeries::with_as_of(symbol, bar_size, DateTime::<Utc>::UNIX_EPOCH);
        for date in dates {
            let key = PartitionKey::new(symbol, bar_size, *date);
            let path = self.layout.intraday_path(&key)?;
            let Some(unit) = read_series(&path, symbol, bar_size)? else {
                return MissSnafu {
                    key: key.to_string(),
                }
                .fail();
            };
            ensure_dates(&path, &unit, self.tz, &BTreeSet::from([*date]))?;
            out = merge_into(&key, out, unit)?;
        }
        Ok(out)
    }

    fn write_units(
        &self,
        symbol: &str,
        bar_size: BarSize,
        units: &BTreeMap<NaiveDate, BarSeries>,
    ) -> Result<(), CacheError> {
        if bar_size.is_daily() {
            return self.write_daily(symbol, bar_size, units.iter().map(|(d, s)| (*d, s)));
        }
        for (date, unit) in units {
            self.write_intraday(&PartitionKey::new(symbol, bar_size, *date), unit)?;
        }
        Ok(())
    }
}

fn merge_into(
    key: &PartitionKey,
    base: BarSeries,
    incoming: BarSeries,
) -> Result<BarSeries, CacheError> {
    let found = format!("{}/{}", incoming.symbol(), incoming.bar_size());
    base.merge(incoming).map_err(|_| {
        KeyMismatchSnafu {
            key: key.to_string(),
            found,
        }
        .build()
    })
}
