// Keepsake backup system.

//! Parsers for the small value languages used on the command line:
//! calendar time spans (`6m`), storage sizes (`10GB`), and dates.

use std::str::FromStr;

use time::{Date, Duration, Month, PrimitiveDateTime, Time};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A span like `6m`: a positive count of calendar days, weeks, months, or
/// years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub count: u32,
    pub unit: SpanUnit,
}

impl FromStr for TimeSpan {
    type Err = Error;

    fn from_str(s: &str) -> Result<TimeSpan> {
        let text: String = s.to_lowercase().split_whitespace().collect();
        let err = || Error::InvalidTimeSpan {
            input: s.to_owned(),
        };
        let unit = match text.chars().last().ok_or_else(err)? {
            'd' => SpanUnit::Days,
            'w' => SpanUnit::Weeks,
            'm' => SpanUnit::Months,
            'y' => SpanUnit::Years,
            _ => return Err(err()),
        };
        let count: u32 = text[..text.len() - 1].parse().map_err(|_| err())?;
        if count == 0 {
            return Err(err());
        }
        Ok(TimeSpan { count, unit })
    }
}

impl TimeSpan {
    /// The instant this span before `now`: anything with an earlier
    /// timestamp is "older than" the span.
    pub fn cutoff(&self, now: PrimitiveDateTime) -> PrimitiveDateTime {
        match self.unit {
            SpanUnit::Days => now - Duration::days(self.count.into()),
            SpanUnit::Weeks => now - Duration::weeks(self.count.into()),
            SpanUnit::Months => {
                PrimitiveDateTime::new(add_months(now.date(), -(self.count as i32)), now.time())
            }
            SpanUnit::Years => PrimitiveDateTime::new(
                clamped_date(now.year() - self.count as i32, now.month() as u8, now.day()),
                now.time(),
            ),
        }
    }
}

/// Shift a date by whole calendar months, clamping into the target month.
///
/// The day of the month only changes when the target month is too short
/// (Jan 31 plus one month is Feb 28 or 29).
pub(crate) fn add_months(date: Date, months: i32) -> Date {
    let zero_based = date.year() as i64 * 12 + (date.month() as u8 as i64 - 1) + months as i64;
    let year = zero_based.div_euclid(12) as i32;
    let month = zero_based.rem_euclid(12) as u8 + 1;
    clamped_date(year, month, date.day())
}

pub(crate) fn add_years(date: Date, years: i32) -> Date {
    clamped_date(date.year() + years, date.month() as u8, date.day())
}

/// Replace a day past the end of the month (e.g. Feb 31) with the last
/// day of the same month.
fn clamped_date(year: i32, month: u8, mut day: u8) -> Date {
    let month = Month::try_from(month).expect("month in 1..=12");
    loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(date) => return date,
            Err(_) => day -= 1,
        }
    }
}

/// Parse a storage size like `10GB` or `512 k` into bytes.
///
/// Units are powers of 1024; case and whitespace are ignored.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let text: String = s.to_uppercase().split_whitespace().collect();
    let err = || Error::InvalidByteSize {
        input: s.to_owned(),
    };
    let text = text.strip_suffix('B').unwrap_or(&text);
    let (number, multiplier) = match text.chars().last() {
        Some('K') => (&text[..text.len() - 1], 1u64 << 10),
        Some('M') => (&text[..text.len() - 1], 1 << 20),
        Some('G') => (&text[..text.len() - 1], 1 << 30),
        Some('T') => (&text[..text.len() - 1], 1 << 40),
        _ => (text, 1),
    };
    let value: f64 = number.parse().map_err(|_| err())?;
    if !value.is_finite() || value < 0.0 {
        return Err(err());
    }
    Ok((value * multiplier as f64).round() as u64)
}

/// Parse `YYYY-MM-DD` as local midnight.
pub fn parse_date(s: &str) -> Result<PrimitiveDateTime> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    let date = Date::parse(s.trim(), &format).map_err(|_| Error::InvalidDate {
        input: s.to_owned(),
    })?;
    Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT))
}
