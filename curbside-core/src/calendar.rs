//! Business calendar and clock.
//!
//! Holidays are an injectable predicate; without configuration only
//! weekends are non-working days.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeSet;

use crate::error::CurbsideError;

pub trait BusinessCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool;

    /// Monday to Friday and not a holiday.
    fn is_business_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.is_holiday(date)
    }
}

impl<C: BusinessCalendar + ?Sized> BusinessCalendar for &C {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        (**self).is_holiday(date)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeekendsOnly;

impl BusinessCalendar for WeekendsOnly {
    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct HolidayList {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayList {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    /// Parse `YYYY-MM-DD` strings, as stored in the config file.
    pub fn parse<S: AsRef<str>>(dates: &[S]) -> Result<Self, CurbsideError> {
        let mut out = BTreeSet::new();
        for d in dates {
            let d = d.as_ref();
            let date = NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                .map_err(|e| CurbsideError::InvalidInput(format!("invalid holiday '{d}': {e}")))?;
            out.insert(date);
        }
        Ok(Self { dates: out })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl BusinessCalendar for HolidayList {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Local working-hours window, same for every business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl BusinessHours {
    /// Parse "08:00" / "16:00".
    pub fn parse(open: &str, close: &str) -> Result<Self, CurbsideError> {
        let p = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| CurbsideError::InvalidInput(format!("invalid business hour '{s}': {e}")))
        };
        let hours = Self {
            open: p(open)?,
            close: p(close)?,
        };
        if hours.open >= hours.close {
            return Err(CurbsideError::InvalidInput(format!(
                "business hours must open before they close ({open}-{close})"
            )));
        }
        Ok(hours)
    }

    pub fn length(&self) -> Duration {
        self.close - self.open
    }

    /// True when `[start, start + duration)` sits inside one business day.
    pub fn fits<Z: TimeZone, C: BusinessCalendar>(
        &self,
        start: &DateTime<Z>,
        duration: Duration,
        calendar: &C,
    ) -> bool {
        let local = start.naive_local();
        let end = local + duration;
        calendar.is_business_day(local.date())
            && local.time() >= self.open
            && end.date() == local.date()
            && end.time() <= self.close
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

/// Wall clock in the agency zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    pub tz: Tz,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Tz>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.0
    }
}

/// "Mon 28 Apr 2025, 12:41PM".
pub fn current_time_label(now: &DateTime<Tz>) -> String {
    now.format("%a %d %b %Y, %I:%M%p").to_string()
}
