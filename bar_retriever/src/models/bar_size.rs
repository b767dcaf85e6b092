//! Sampling interval of a bar series.
//!
//! A [`BarSize`] wraps a positive duration of at most one day. Its canonical
//! label (`"1 sec"`, `"5 mins"`, `"4 hours"`, `"1 day"`) doubles as the folder
//! name of intraday cache partitions, so the label and [`FromStr`] agree on the
//! same vocabulary.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Number of seconds in a minute.
pub const SECS_PER_MINUTE: i64 = 60;
/// Number of seconds in an hour.
pub const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
/// Number of seconds in a day.
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarSizeError {
    #[error("Invalid bar size {duration}: {message}")]
    InvalidBarSize { duration: TimeDelta, message: String },

    #[error("Invalid input: {}", message)]
    InvalidInput { message: String },
}

/// A validated bar duration, `0 < duration <= 24h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BarSize(TimeDelta);

impl BarSize {
    pub fn new(duration: TimeDelta) -> Result<Self, BarSizeError> {
        if duration <= TimeDelta::zero() {
            return Err(BarSizeError::InvalidBarSize {
                duration,
                message: "bar size must be positive".into(),
            });
        }
        if duration > TimeDelta::days(1) {
            return Err(BarSizeError::InvalidBarSize {
                duration,
                message: "bar size must not exceed 24 hours".into(),
            });
        }
        Ok(Self(duration))
    }

    pub fn seconds(amount: u32) -> Result<Self, BarSizeError> {
        Self::new(TimeDelta::seconds(amount as i64))
    }

    pub fn minutes(amount: u32) -> Result<Self, BarSizeError> {
        Self::new(TimeDelta::minutes(amount as i64))
    }

    pub fn hours(amount: u32) -> Result<Self, BarSizeError> {
        Self::new(TimeDelta::hours(amount as i64))
    }

    /// The one-day bar size. Infallible since it sits exactly on the upper bound.
    pub const fn day() -> Self {
        Self(TimeDelta::seconds(SECS_PER_DAY))
    }

    pub const fn duration(&self) -> TimeDelta {
        self.0
    }

    /// Daily-or-coarser bars share a single cache file per symbol.
    pub fn is_daily(&self) -> bool {
        self.0 >= TimeDelta::days(1)
    }

    pub fn is_intraday(&self) -> bool {
        !self.is_daily()
    }

    /// Whether the label maps back to exactly this duration.
    ///
    /// A 90 second bar renders as `"1 min"`, the same folder as a one-minute bar,
    /// so only whole multiples of the label's unit are canonical.
    pub fn is_canonical(&self) -> bool {
        if self.0.subsec_nanos() != 0 {
            return false;
        }
        let secs = self.0.num_seconds();
        let unit = if secs < SECS_PER_MINUTE {
            1
        } else if secs < SECS_PER_HOUR {
            SECS_PER_MINUTE
        } else if secs < SECS_PER_DAY {
            SECS_PER_HOUR
        } else {
            SECS_PER_DAY
        };
        secs % unit == 0
    }

    /// Checks that `ts` falls on a natural boundary of this bar size, measured
    /// from local midnight in `tz`. Daily bars must sit exactly on midnight.
    pub fn is_aligned(&self, ts: DateTime<Utc>, tz: Tz) -> bool {
        let local = ts.with_timezone(&tz);
        if local.nanosecond() != 0 {
            return false;
        }
        let since_midnight = local.num_seconds_from_midnight() as i64;
        let secs = self.0.num_seconds();
        if self.is_daily() || secs == 0 {
            return since_midnight == 0;
        }
        since_midnight % secs == 0
    }
}

impl fmt::Display for BarSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        let (amount, singular, plural) = if secs < SECS_PER_MINUTE {
            (secs, "sec", "secs")
        } else if secs < SECS_PER_HOUR {
            (secs / SECS_PER_MINUTE, "min", "mins")
        } else if secs < SECS_PER_DAY {
            (secs / SECS_PER_HOUR, "hour", "hours")
        } else {
            return write!(f, "1 day");
        };
        if amount == 1 {
            write!(f, "1 {singular}")
        } else {
            write!(f, "{amount} {plural}")
        }
    }
}

impl FromStr for BarSize {
    type Err = BarSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(BarSizeError::InvalidInput {
                message: format!("expected '<amount> <unit>', got '{s}'"),
            });
        };
        let amount: u32 = amount.parse().map_err(|_| BarSizeError::InvalidInput {
            message: format!("bad amount in '{s}'"),
        })?;
        match unit {
            "sec" | "secs" => Self::seconds(amount),
            "min" | "mins" => Self::minutes(amount),
            "hour" | "hours" => Self::hours(amount),
            "day" | "days" => Self::new(TimeDelta::days(amount as i64)),
            _ => Err(BarSizeError::InvalidInput {
                message: format!("unknown unit '{unit}'"),
            }),
        }
    }
}

impl TryFrom<TimeDelta> for BarSize {
    type Error = BarSizeError;

    fn try_from(duration: TimeDelta) -> Result<Self, Self::Error> {
        Self::new(duration)
    }
}

impl From<BarSize> for TimeDelta {
    fn from(size: BarSize) -> Self {
        size.0
    }
}

impl PartialEq<TimeDelta> for BarSize {
    fn eq(&self, other: &TimeDelta) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<TimeDelta> for BarSize {
    fn partial_cmp(&self, other: &TimeDelta) -> Option<Ordering> {
        Some(self.0.cmp(other))
    }
}

impl PartialEq<BarSize> for TimeDelta {
    fn eq(&self, other: &BarSize) -> bool {
        *self == other.0
    }
}

impl PartialOrd<BarSize> for TimeDelta {
    fn partial_cmp(&self, other: &BarSize) -> Option<Ordering> {
        Some(self.cmp(&other.0))
    }
}
