//! CSV and sidecar encoding for cache files.
//!
//! Every write goes to a temporary file in the destination directory and is
//! then renamed over the target, so readers see either the old or the new file.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::Path,
    time::SystemTime,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::{
    cache::errors::{CacheError, CorruptionSnafu, EncodeMetaSnafu, EncodeSnafu, IoSnafu},
    models::{bar::Bar, bar_series::BarSeries, bar_size::BarSize},
};

pub const CSV_HEADER: [&str; 8] = [
    "timestamp", "open", "high", "low", "close", "wap", "volume", "count",
];

/// Covered session dates for a symbol's daily file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMeta {
    pub dates: BTreeSet<NaiveDate>,
}

/// Reads a bar file into a series stamped with the file's modification time.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_series(
    path: &Path,
    symbol: &str,
    bar_size: BarSize,
) -> Result<Option<BarSeries>, CacheError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(IoSnafu { path }),
    };
    let as_of = file
        .metadata()
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

    let corrupt = |reason: String| {
        warn!(path = %path.display(), %reason, "corrupt cache file");
        CorruptionSnafu { path, reason }.build()
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| corrupt(format!("unreadable header: {e}")))?;
    if headers.iter().ne(CSV_HEADER) {
        return Err(corrupt(format!(
            "unexpected header '{}'",
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let mut series = BarSeries::with_as_of(symbol, bar_size, as_of);
    for (row, record) in reader.deserialize::<Bar>().enumerate() {
        let bar = record.map_err(|e| corrupt(format!("row {}: {e}", row + 1)))?;
        series.add_bar(bar);
    }
    Ok(Some(series))
}

/// Atomically replaces `path` with the bars of `series`. An empty series
/// produces a header-only file.
pub fn write_series(path: &Path, series: &BarSeries) -> Result<(), CacheError> {
    let dir = parent_dir(path)?;
    let tmp = NamedTempFile::new_in(dir).context(IoSnafu { path: dir })?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(tmp.as_file());
    writer.write_record(CSV_HEADER).context(EncodeSnafu { path })?;
    for bar in series.iter() {
        writer.serialize(bar).context(EncodeSnafu { path })?;
    }
    writer.flush().context(IoSnafu { path })?;
    drop(writer);

    persist(tmp, path)
}

/// Reads the coverage sidecar. A missing file is an empty coverage set.
pub fn read_meta(path: &Path) -> Result<CoverageMeta, CacheError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CoverageMeta::default()),
        Err(e) => return Err(e).context(IoSnafu { path }),
    };
    serde_json::from_str(&content).map_err(|e| {
        warn!(path = %path.display(), error = %e, "corrupt coverage sidecar");
        CorruptionSnafu {
            path,
            reason: e.to_string(),
        }
        .build()
    })
}

pub fn write_meta(path: &Path, meta: &CoverageMeta) -> Result<(), CacheError> {
    let dir = parent_dir(path)?;
    let json = serde_json::to_vec_pretty(meta).context(EncodeMetaSnafu { path })?;
    let mut tmp = NamedTempFile::new_in(dir).context(IoSnafu { path: dir })?;
    tmp.write_all(&json).context(IoSnafu { path })?;
    persist(tmp, path)
}

fn parent_dir(path: &Path) -> Result<&Path, CacheError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).context(IoSnafu { path: dir })?;
    Ok(dir)
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), CacheError> {
    tmp.as_file().sync_all().context(IoSnafu { path })?;
    tmp.persist(path).map_err(|e| e.error).context(IoSnafu { path })?;
    Ok(())
}

/// Fails with `Corruption` when any bar in `series` is not on one of `dates`.
pub fn ensure_dates(
    path: &Path,
    series: &BarSeries,
    tz: chrono_tz::Tz,
    dates: &BTreeSet<NaiveDate>,
) -> Result<(), CacheError> {
    let stray = series.session_dates(tz).into_iter().find(|d| !dates.contains(d));
    ensure!(
        stray.is_none(),
        CorruptionSnafu {
            path,
            reason: format!("bar on unexpected session date {stray:?}"),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> BarSeries {
        let mut s = BarSeries::new("SPY", BarSize::day());
        for (day, px) in [(30, 254.81), (31, 257.75)] {
            let ts = Utc.with_ymd_and_hms(2020, 3, day, 4, 0, 0).unwrap();
            s.add_bar(Bar::new(ts, px, px + 1.5, px - 2.25, px + 0.1, px, 123_456_789, 98_765));
        }
        s
    }

    #[test]
    fn write_then_read_preserves_bars() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SPY").join("daily.csv");
        let series = sample();
        write_series(&path, &series).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp,open,high,low,close,wap,volume,count\n"));
        assert!(text.contains("2020-03-30T04:00:00Z,254.81,"));

        let back = read_series(&path, "SPY", BarSize::day()).unwrap().unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn empty_series_writes_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csv");
        write_series(&path, &BarSeries::new("SPY", BarSize::minutes(1).unwrap())).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap().trim_end(),
            CSV_HEADER.join(",")
        );
        let back = read_series(&path, "SPY", BarSize::minutes(1).unwrap()).unwrap().unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_series(&dir.path().join("nope.csv"), "SPY", BarSize::day())
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_files_are_corruption() {
        let dir = TempDir::new().unwrap();
        let cases = [
            ("empty.csv", ""),
            ("header.csv", "time,o,h,l,c\n"),
            (
                "row.csv",
                "timestamp,open,high,low,close,wap,volume,count\nnot-a-date,1,1,1,1,1,1,1\n",
            ),
            (
                "short.csv",
                "timestamp,open,high,low,close,wap,volume,count\n2020-03-30T04:00:00Z,1,1\n",
            ),
        ];
        for (name, content) in cases {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            let err = read_series(&path, "SPY", BarSize::day()).unwrap_err();
            assert!(err.is_corruption(), "{name}: {err}");
        }
    }

    #[test]
    fn meta_roundtrip_and_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daily.meta.json");
        assert_eq!(read_meta(&path).unwrap(), CoverageMeta::default());

        let meta = CoverageMeta {
            dates: BTreeSet::from([NaiveDate::from_ymd_opt(2020, 3, 28).unwrap()]),
        };
        write_meta(&path, &meta).unwrap();
        assert_eq!(read_meta(&path).unwrap(), meta);

        fs::write(&path, "{ not json").unwrap();
        assert!(read_meta(&path).unwrap_err().is_corruption());
    }
}
