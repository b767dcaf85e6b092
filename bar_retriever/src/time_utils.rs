//! Calendar and time zone helpers.
//!
//! - [`from_local_naive_with_policy`]: local wall time in an IANA zone to UTC,
//!   with a [`DstPolicy`] deciding DST gaps and ambiguities.
//! - [`session_start`]: the instant a session date begins in the market zone.
//! - [`dates_range`] / [`session_dates_between`]: half-open date sequences used
//!   to partition a request into cache units.
//! - [`parse_ib_datetime`]: `"YYYYMMDD HH:MM:SS"` or `"YYYYMMDD"` broker stamps.
//!
//! Notes:
//! - Ambiguous local times happen during "fall back" when a wall time occurs twice.
//! - Nonexistent local times happen during "spring forward" when a wall time is skipped.
//! - A handful of zones move their clocks at midnight, so session starts resolve
//!   with [`DstPolicy::Lenient`] instead of failing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("ambiguous local time {naive} in {tz}")]
    Ambiguous { naive: NaiveDateTime, tz: Tz },

    #[error("nonexistent local time {naive} in {tz}")]
    Nonexistent { naive: NaiveDateTime, tz: Tz },

    #[error("bad timestamp '{input}': {message}")]
    BadTimestamp { input: String, message: String },
}

/// Policy for handling DST edge cases when converting local naive timestamps to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstPolicy {
    /// Error on ambiguous (fall-back) or nonexistent (spring-forward) local times.
    Strict,
    /// For ambiguous local times pick the earlier instant.
    PreferEarliest,
    /// For ambiguous local times pick the later instant.
    PreferLatest,
    /// For nonexistent local times step forward one minute at a time until a
    /// valid instant is found (capped at 2 hours).
    ShiftForward,
    /// Earliest instant when ambiguous, shift forward when nonexistent.
    Lenient,
}

/// Convert a naive local timestamp to UTC using a specific IANA time zone and DST policy.
pub fn from_local_naive_with_policy(
    naive: NaiveDateTime,
    tz: Tz,
    policy: DstPolicy,
) -> Result<DateTime<Utc>, TimeError> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) => Ok(dt.with_timezone(&Utc)),
        Ambiguous(a, b) => match policy {
            DstPolicy::PreferEarliest | DstPolicy::Lenient => Ok(a.with_timezone(&Utc)),
            DstPolicy::PreferLatest => Ok(b.with_timezone(&Utc)),
            _ => Err(TimeError::Ambiguous { naive, tz }),
        },
        None => match policy {
            DstPolicy::ShiftForward | DstPolicy::Lenient => {
                let mut t = naive;
                for _ in 0..120 {
                    t += chrono::Duration::minutes(1);
                    if let Single(dt) = tz.from_local_datetime(&t) {
                        return Ok(dt.with_timezone(&Utc));
                    }
                }
                Err(TimeError::Nonexistent { naive, tz })
            }
            _ => Err(TimeError::Nonexistent { naive, tz }),
        },
    }
}

/// First instant of `date` in `tz`, i.e. local midnight as UTC.
pub fn session_start(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, TimeError> {
    from_local_naive_with_policy(date.and_time(NaiveTime::MIN), tz, DstPolicy::Lenient)
}

/// The calendar date of `ts` in `tz`.
pub fn local_date(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

/// Every date in `[start, end)`. Empty when `end <= start`.
pub fn dates_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d < end).collect()
}

/// Session dates touched by `[start, end)` in `tz`.
///
/// The date containing `end` is excluded even when `end` is after its midnight,
/// so a request that starts and ends on the same local date yields no dates.
pub fn session_dates_between(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> Vec<NaiveDate> {
    dates_range(local_date(start, tz), local_date(end, tz))
}

/// Parse a broker timestamp, either `"YYYYMMDD HH:MM:SS"` (local wall time in
/// `tz`) or a bare `"YYYYMMDD"` (the session start of that date).
pub fn parse_ib_datetime(s: &str, tz: Tz) -> Result<DateTime<Utc>, TimeError> {
    let s = s.trim();
    let bad = |e: chrono::ParseError| TimeError::BadTimestamp {
        input: s.to_string(),
        message: e.to_string(),
    };
    if s.len() == 8 {
        let date = NaiveDate::parse_from_str(s, "%Y%m%d").map_err(bad)?;
        return session_start(date, tz);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y%m%d %H:%M:%S").map_err(bad)?;
    from_local_naive_with_policy(naive, tz, DstPolicy::Strict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dates_range_excludes_end() {
        let dates = dates_range(ymd(2010, 9, 10), ymd(2010, 9, 20));
        assert_eq!(dates.len(), 10);
        assert_eq!(dates.first(), Some(&ymd(2010, 9, 10)));
        assert_eq!(dates.last(), Some(&ymd(2010, 9, 19)));
        assert!(dates_range(ymd(2010, 9, 20), ymd(2010, 9, 10)).is_empty());
    }

    #[test]
    fn session_dates_between_uses_market_dates() {
        let tz = chrono_tz::America::New_York;
        let start = Utc.with_ymd_and_hms(2020, 3, 30, 13, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 4, 3, 20, 30, 0).unwrap();
        let dates = session_dates_between(start, end, tz);
        assert_eq!(dates, dates_range(ymd(2020, 3, 30), ymd(2020, 4, 3)));

        let same_day_end = Utc.with_ymd_and_hms(2020, 3, 30, 20, 0, 0).unwrap();
        assert!(session_dates_between(start, same_day_end, tz).is_empty());
    }

    #[test]
    fn session_start_is_local_midnight() {
        let tz = chrono_tz::America::New_York;
        // EDT (UTC-4) on 2020-03-30.
        assert_eq!(
            session_start(ymd(2020, 3, 30), tz).unwrap(),
            Utc.with_ymd_and_hms(2020, 3, 30, 4, 0, 0).unwrap()
        );
        // EST (UTC-5) on 2020-01-15.
        assert_eq!(
            session_start(ymd(2020, 1, 15), tz).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 15, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn session_start_survives_midnight_dst_gap() {
        // Havana springs forward at midnight: 2024-03-10 00:00 does not exist.
        let tz = chrono_tz::America::Havana;
        let got = session_start(ymd(2024, 3, 10), tz).unwrap();
        assert_eq!(local_date(got, tz), ymd(2024, 3, 10));
    }

    #[test]
    fn ny_spring_forward_gap_is_error_strict() {
        let naive = ymd(2024, 3, 10).and_hms_opt(2, 30, 0).unwrap();
        let res = from_local_naive_with_policy(
            naive,
            chrono_tz::America::New_York,
            DstPolicy::Strict,
        );
        assert!(matches!(res, Err(TimeError::Nonexistent { .. })));
    }

    #[test]
    fn ny_fall_back_prefer_earliest_and_latest() {
        let naive = ymd(2024, 11, 3).and_hms_opt(1, 30, 0).unwrap();
        let tz = chrono_tz::America::New_York;
        assert_eq!(
            from_local_naive_with_policy(naive, tz, DstPolicy::PreferEarliest).unwrap(),
            Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap()
        );
        assert_eq!(
            from_local_naive_with_policy(naive, tz, DstPolicy::PreferLatest).unwrap(),
            Utc.with_ymd_and_hms(2024, 11, 3, 6, 30, 0).unwrap()
        );
        assert!(from_local_naive_with_policy(naive, tz, DstPolicy::Strict).is_err());
    }

    #[test]
    fn parse_ib_datetime_formats() {
        let tz = chrono_tz::America::New_York;
        assert_eq!(
            parse_ib_datetime("20200330 09:30:00", tz).unwrap(),
            Utc.with_ymd_and_hms(2020, 3, 30, 13, 30, 0).unwrap()
        );
        assert_eq!(
            parse_ib_datetime("20200330", tz).unwrap(),
            Utc.with_ymd_and_hms(2020, 3, 30, 4, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_ib_datetime("2020-03-30", tz),
            Err(TimeError::BadTimestamp { .. })
        ));
    }
}
