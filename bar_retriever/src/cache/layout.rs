//! Mapping from partition keys to paths under the cache root.
//!
//! ```text
//! <root>/<symbol>/daily.csv
//! <root>/<symbol>/daily.meta.json
//! <root>/<symbol>/<BarSize label>/<YYYYMMDD>.csv
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use snafu::ensure;

use crate::{
    cache::errors::{CacheError, InvalidKeySnafu},
    models::bar_size::BarSize,
};

pub const DAILY_FILE: &str = "daily.csv";
pub const DAILY_META_FILE: &str = "daily.meta.json";
pub const INTRADAY_DATE_FORMAT: &str = "%Y%m%d";

/// Identifies exactly one cached unit: a symbol's bars of one size on one date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub symbol: String,
    pub bar_size: BarSize,
    pub date: NaiveDate,
}

impl PartitionKey {
    pub fn new(symbol: impl Into<String>, bar_size: BarSize, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            bar_size,
            date,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.bar_size, self.date)
    }
}

/// Path arithmetic for a cache root. Performs no I/O.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symbol_dir(&self, symbol: &str) -> Result<PathBuf, CacheError> {
        validate_symbol(symbol)?;
        Ok(self.root.join(symbol))
    }

    pub fn daily_path(&self, symbol: &str) -> Result<PathBuf, CacheError> {
        Ok(self.symbol_dir(symbol)?.join(DAILY_FILE))
    }

    pub fn daily_meta_path(&self, symbol: &str) -> Result<PathBuf, CacheError> {
        Ok(self.symbol_dir(symbol)?.join(DAILY_META_FILE))
    }

    pub fn intraday_dir(&self, symbol: &str, bar_size: BarSize) -> Result<PathBuf, CacheError> {
        ensure!(
            bar_size.is_canonical(),
            InvalidKeySnafu {
                message: format!("bar size {bar_size} has no canonical folder"),
            }
        );
        Ok(self.symbol_dir(symbol)?.join(bar_size.to_string()))
    }

    pub fn intraday_path(&self, key: &PartitionKey) -> Result<PathBuf, CacheError> {
        Ok(self
            .intraday_dir(&key.symbol, key.bar_size)?
            .join(format!("{}.csv", key.date.format(INTRADAY_DATE_FORMAT))))
    }

    /// The file that holds `key`'s bars.
    pub fn data_path(&self, key: &PartitionKey) -> Result<PathBuf, CacheError> {
        if key.bar_size.is_daily() {
            self.daily_path(&key.symbol)
        } else {
            self.intraday_path(key)
        }
    }
}

/// Parses the date out of an intraday file name such as `20200330.csv`.
pub fn intraday_file_date(path: &Path) -> Option<NaiveDate> {
    if path.extension()? != "csv" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, INTRADAY_DATE_FORMAT).ok()
}

fn validate_symbol(symbol: &str) -> Result<(), CacheError> {
    ensure!(
        !symbol.trim().is_empty(),
        InvalidKeySnafu {
            message: "symbol cannot be empty",
        }
    );
    ensure!(
        !symbol.contains(['/', '\\']) && symbol != "." && symbol != "..",
        InvalidKeySnafu {
            message: format!("symbol '{symbol}' is not a valid directory name"),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 30).unwrap()
    }

    #[test]
    fn daily_keys_share_one_file() {
        let layout = CacheLayout::new("/cache");
        let key = PartitionKey::new("SPY", BarSize::day(), date());
        assert_eq!(
            layout.data_path(&key).unwrap(),
            PathBuf::from("/cache/SPY/daily.csv")
        );
        assert_eq!(
            layout.daily_meta_path("SPY").unwrap(),
            PathBuf::from("/cache/SPY/daily.meta.json")
        );
    }

    #[test]
    fn intraday_keys_use_label_folder() {
        let layout = CacheLayout::new("/cache");
        let key = PartitionKey::new("SPY", BarSize::minutes(5).unwrap(), date());
        let path = layout.data_path(&key).unwrap();
        assert_eq!(path, PathBuf::from("/cache/SPY/5 mins/20200330.csv"));
        assert_eq!(intraday_file_date(&path), Some(date()));
        assert_eq!(intraday_file_date(Path::new("/cache/SPY/5 mins/notes.txt")), None);
    }

    #[test]
    fn bad_keys_are_rejected() {
        let layout = CacheLayout::new("/cache");
        for symbol in ["", "  ", "../etc", "A/B", ".."] {
            let key = PartitionKey::new(symbol, BarSize::day(), date());
            assert!(matches!(
                layout.data_path(&key),
                Err(CacheError::InvalidKey { .. })
            ));
        }
        let odd = PartitionKey::new("SPY", BarSize::seconds(90).unwrap(), date());
        assert!(layout.data_path(&odd).is_err());
    }

    #[test]
    fn key_display() {
        let key = PartitionKey::new("SPY", BarSize::minutes(1).unwrap(), date());
        assert_eq!(key.to_string(), "SPY/1 min/2020-03-30");
    }
}
