//! # CF Time Axis
//!
//! Decodes numeric time coordinates following the CF conventions
//! (`"<unit> since <reference>"` plus a `calendar` attribute) into calendar
//! years, which is all the climatology window needs.
//!
//! Supported units: `seconds`, `minutes`, `hours`, `days`, `months`, `years`.
//! Supported calendars: `standard`, `gregorian`, `proleptic_gregorian`,
//! `noleap`/`365_day`, `all_leap`/`366_day` and `360_day`.
//!
//! Month and year units count calendar months/years from the reference date,
//! as the ISIMIP monthly and annual products do.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use std::fmt;
use std::str::FromStr;

const SECONDS_PER_DAY: f64 = 86_400.0;

const NOLEAP_CUMULATIVE_DAYS: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const ALL_LEAP_CUMULATIVE_DAYS: [u32; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl TimeUnit {
    fn seconds(&self) -> Option<f64> {
        match self {
            TimeUnit::Seconds => Some(1.0),
            TimeUnit::Minutes => Some(60.0),
            TimeUnit::Hours => Some(3_600.0),
            TimeUnit::Days => Some(SECONDS_PER_DAY),
            TimeUnit::Months | TimeUnit::Years => None,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "second" | "seconds" | "sec" | "secs" | "s" => Ok(TimeUnit::Seconds),
            "minute" | "minutes" | "min" | "mins" => Ok(TimeUnit::Minutes),
            "hour" | "hours" | "hr" | "hrs" | "h" => Ok(TimeUnit::Hours),
            "day" | "days" | "d" => Ok(TimeUnit::Days),
            "month" | "months" => Ok(TimeUnit::Months),
            "year" | "years" => Ok(TimeUnit::Years),
            other => Err(format!("unsupported time unit '{}'", other)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Months => "months",
            TimeUnit::Years => "years",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Standard,
    NoLeap,
    AllLeap,
    Day360,
}

impl FromStr for Calendar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "standard" | "gregorian" | "proleptic_gregorian" => Ok(Calendar::Standard),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(format!("unsupported calendar '{}'", other)),
        }
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Calendar::Standard => "standard",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
        };
        f.write_str(name)
    }
}

/// A decoded `units`/`calendar` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
    pub calendar: Calendar,
}

impl TimeAxis {
    /// Parses CF `units` (e.g. `"days since 1850-1-1 00:00:00"`) and an
    /// optional `calendar` attribute.
    pub fn parse(units: &str, calendar: Option<&str>) -> Result<Self, String> {
        let (unit, reference) = units
            .split_once(" since ")
            .ok_or_else(|| format!("time units '{}' lack a 'since' reference", units))?;
        let unit = unit.trim().parse::<TimeUnit>()?;
        let epoch = parse_reference(reference.trim())?;
        let calendar = calendar.unwrap_or("standard").parse::<Calendar>()?;
        Ok(Self {
            unit,
            epoch,
            calendar,
        })
    }

    /// Calendar year of the time coordinate `value`.
    ///
    /// Offsets whose year does not fit an `i32` are rejected.
    pub fn year_of(&self, value: f64) -> Result<i32, String> {
        if !value.is_finite() {
            return Err(format!("non-finite time value {}", value));
        }
        let out_of_range = || format!("time offset {} {} is out of range", value, self.unit);

        match self.unit {
            TimeUnit::Months => whole(value)
                .and_then(|months| self.add_months(months))
                .ok_or_else(out_of_range),
            TimeUnit::Years => whole(value)
                .and_then(|years| i32::try_from(years).ok())
                .and_then(|years| self.epoch.year().checked_add(years))
                .ok_or_else(out_of_range),
            unit => {
                let unit_seconds = unit.seconds().unwrap_or(1.0);
                let seconds = value * unit_seconds;
                let year = match self.calendar {
                    Calendar::Standard => return self.gregorian_year(seconds),
                    Calendar::NoLeap => self.fixed_year(seconds, 365, &NOLEAP_CUMULATIVE_DAYS),
                    Calendar::AllLeap => self.fixed_year(seconds, 366, &ALL_LEAP_CUMULATIVE_DAYS),
                    Calendar::Day360 => self.day360_year(seconds),
                };
                year.ok_or_else(out_of_range)
            }
        }
    }

    fn add_months(&self, months: i64) -> Option<i32> {
        let epoch_months = self.epoch.year() as i64 * 12 + self.epoch.month0() as i64;
        let total = epoch_months.checked_add(months)?;
        i32::try_from(total.div_euclid(12)).ok()
    }

    fn gregorian_year(&self, seconds: f64) -> Result<i32, String> {
        let out_of_range = || format!("time offset of {} seconds is out of range", seconds);
        let millis = whole((seconds * 1_000.0).round()).ok_or_else(out_of_range)?;
        let delta = TimeDelta::try_milliseconds(millis).ok_or_else(out_of_range)?;
        self.epoch
            .checked_add_signed(delta)
            .map(|t| t.year())
            .ok_or_else(out_of_range)
    }

    /// Years for calendars where every year has the same length.
    fn fixed_year(&self, seconds: f64, year_days: u32, cumulative: &[u32; 12]) -> Option<i32> {
        let epoch_day_of_year = cumulative[self.epoch.month0() as usize] + self.epoch.day0();
        self.years_after_epoch(epoch_day_of_year, seconds, year_days)
    }

    fn day360_year(&self, seconds: f64) -> Option<i32> {
        let epoch_day_of_year = self.epoch.month0() * 30 + self.epoch.day0().min(29);
        self.years_after_epoch(epoch_day_of_year, seconds, 360)
    }

    fn years_after_epoch(&self, epoch_day_of_year: u32, seconds: f64, year_days: u32) -> Option<i32> {
        let epoch_seconds = epoch_day_of_year as f64 * SECONDS_PER_DAY
            + seconds_of_day(self.epoch.time());
        let total_days = whole((epoch_seconds + seconds) / SECONDS_PER_DAY)?;
        let years = i32::try_from(total_days.div_euclid(year_days as i64)).ok()?;
        self.epoch.year().checked_add(years)
    }
}

/// `value` rounded down, if it fits an `i64`.
fn whole(value: f64) -> Option<i64> {
    let floored = value.floor();
    (floored.is_finite() && floored >= i64::MIN as f64 && floored < i64::MAX as f64)
        .then_some(floored as i64)
}

fn seconds_of_day(time: NaiveTime) -> f64 {
    time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 / 1e9
}

/// Parses reference dates such as `1601-1-1`, `1850-01-01 00:00:00`,
/// `1661-01-01T00:00:00Z`. Month and day need not be zero-padded.
fn parse_reference(reference: &str) -> Result<NaiveDateTime, String> {
    let invalid = || format!("invalid reference date '{}'", reference);
    let cleaned = reference.trim_end_matches('Z').trim_end_matches(" UTC");
    let (date_part, time_part) = match cleaned.split_once(['T', ' ']) {
        Some((d, t)) => (d, Some(t.trim())),
        None => (cleaned, None),
    };

    let mut fields = date_part.splitn(3, '-');
    let year: i32 = fields.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
    let month: u32 = fields.next().map_or(Some(1), |v| v.parse().ok()).ok_or_else(invalid)?;
    let day: u32 = fields.next().map_or(Some(1), |v| v.parse().ok()).ok_or_else(invalid)?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;

    let time = match time_part.filter(|t| !t.is_empty()) {
        None => NaiveTime::MIN,
        Some(t) => {
            let mut hms = t.splitn(3, ':');
            let h: u32 = hms.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
            let m: u32 = hms.next().map_or(Some(0), |v| v.parse().ok()).ok_or_else(invalid)?;
            let s: f64 = hms.next().map_or(Some(0.0), |v| v.parse().ok()).ok_or_else(invalid)?;
            NaiveTime::from_hms_opt(h, m, s.floor() as u32).ok_or_else(invalid)?
        }
    };

    Ok(NaiveDateTime::new(date, time))
}
