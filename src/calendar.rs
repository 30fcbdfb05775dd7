use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leading text of every [`ParseError`] message. Request decoding uses it to
/// tell a bad date apart from other malformed fields.
pub(crate) const PARSE_ERROR_PREFIX: &str = "malformed date";

/// Malformed date (or year/month) input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed date {input:?}: expected YYYY/MM/DD")]
pub struct ParseError {
    pub input: String,
}

impl ParseError {
    fn new(input: impl Into<String>) -> Self {
        Self { input: input.into() }
    }
}

/// A calendar day. Canonical text form is `YYYY/MM/DD`; `YYYY-MM-DD` is accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarDate(NaiveDate);

const WEEKDAY_IDS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl CalendarDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, ParseError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| ParseError::new(format!("{year:04}/{month:02}/{day:02}")))
    }

    pub fn naive(self) -> NaiveDate {
        self.0
    }

    /// `YYYY-MM-DD`, used for range boundaries.
    pub fn iso(self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn weekday(self) -> Weekday {
        self.0.weekday()
    }

    /// One of `sun, mon, tue, wed, thu, fri, sat`.
    pub fn weekday_id(self) -> &'static str {
        weekday_id(self.0.weekday())
    }

    /// Monday of the week containing this date (weeks start on Monday).
    pub fn monday_of(self) -> Self {
        self.add_days(-i64::from(self.0.weekday().num_days_from_monday()))
    }

    /// Shift by `n` days. Saturates at the representable range.
    pub fn add_days(self, n: i64) -> Self {
        let shifted = if n >= 0 {
            self.0.checked_add_days(Days::new(n.unsigned_abs()))
        } else {
            self.0.checked_sub_days(Days::new(n.unsigned_abs()))
        };
        Self(shifted.unwrap_or(if n >= 0 { NaiveDate::MAX } else { NaiveDate::MIN }))
    }

    /// Signed number of days from `self` to `other`.
    pub fn days_until(self, other: CalendarDate) -> i64 {
        (other.0 - self.0).num_days()
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y/%m/%d"))
    }
}

impl FromStr for CalendarDate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let normalized = trimmed.replace('-', "/");
        let mut parts = normalized.split('/');
        let (Some(y), Some(m), Some(d), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::new(s));
        };
        if y.len() != 4 || m.is_empty() || m.len() > 2 || d.is_empty() || d.len() > 2 {
            return Err(ParseError::new(s));
        }
        let year: i32 = y.parse().map_err(|_| ParseError::new(s))?;
        let month: u32 = m.parse().map_err(|_| ParseError::new(s))?;
        let day: u32 = d.parse().map_err(|_| ParseError::new(s))?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| ParseError::new(s))
    }
}

impl TryFrom<String> for CalendarDate {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarDate> for String {
    fn from(date: CalendarDate) -> Self {
        date.to_string()
    }
}

pub fn weekday_id(weekday: Weekday) -> &'static str {
    WEEKDAY_IDS[weekday.num_days_from_monday() as usize]
}

pub fn parse_weekday_id(id: &str) -> Option<Weekday> {
    WEEKDAY_IDS
        .iter()
        .position(|w| *w == id)
        .map(|i| WEEKDAYS[i])
}

/// Identifier of one bookable cell: `{YYYY/MM/DD}|{facility}|{periodId}`.
pub fn canonical_key(date: CalendarDate, facility: &str, period_id: &str) -> String {
    format!("{date}|{facility}|{period_id}")
}

/// First and last day of a month.
pub fn month_bounds(year: i32, month: u32) -> Result<(CalendarDate, CalendarDate), ParseError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ParseError::new(format!("{year:04}/{month:02}")))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last = next
        .and_then(|n| n.pred_opt())
        .ok_or_else(|| ParseError::new(format!("{year:04}/{month:02}")))?;
    Ok((CalendarDate(first), CalendarDate(last)))
}

/// Today in the server's local timezone.
pub fn today() -> CalendarDate {
    CalendarDate(Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_start_with_the_shared_prefix() {
        let err = "2025/13/40".parse::<CalendarDate>().unwrap_err();
        assert!(err.to_string().starts_with(PARSE_ERROR_PREFIX));
        let err = CalendarDate::from_ymd(2025, 2, 30).unwrap_err();
        assert!(err.to_string().starts_with(PARSE_ERROR_PREFIX));
    }

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    #[test]
    fn parse_both_separators() {
        assert_eq!(d("2025/03/03"), d("2025-03-03"));
        assert_eq!(d("2025-3-3").to_string(), "2025/03/03");
        assert_eq!(d("2025/03/03").iso(), "2025-03-03");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "2025", "2025/13/01", "2025/02/30", "25/03/03", "2025/03/03/01", "abcd/ef/gh"] {
            let err = bad.parse::<CalendarDate>().unwrap_err();
            assert_eq!(err.input, bad);
        }
    }

    #[test]
    fn weekday_ids() {
        assert_eq!(d("2025/03/03").weekday_id(), "mon");
        assert_eq!(d("2025/03/08").weekday_id(), "sat");
        assert_eq!(d("2025/03/09").weekday_id(), "sun");
        assert_eq!(parse_weekday_id("wed"), Some(Weekday::Wed));
        assert_eq!(parse_weekday_id("sun"), Some(Weekday::Sun));
        assert_eq!(parse_weekday_id("xyz"), None);
    }

    #[test]
    fn monday_of_week() {
        assert_eq!(d("2025/03/03").monday_of(), d("2025/03/03"));
        assert_eq!(d("2025/03/06").monday_of(), d("2025/03/03"));
        // Sunday belongs to the week that started the previous Monday
        assert_eq!(d("2025/03/09").monday_of(), d("2025/03/03"));
    }

    #[test]
    fn add_days_crosses_month_and_year() {
        assert_eq!(d("2025/02/27").add_days(2), d("2025/03/01"));
        assert_eq!(d("2025/01/01").add_days(-1), d("2024/12/31"));
        assert_eq!(d("2024/02/28").add_days(1), d("2024/02/29"));
        assert_eq!(d("2025/03/03").days_until(d("2025/03/24")), 21);
    }

    #[test]
    fn month_bounds_handles_lengths() {
        assert_eq!(month_bounds(2024, 2).unwrap(), (d("2024/02/01"), d("2024/02/29")));
        assert_eq!(month_bounds(2025, 12).unwrap(), (d("2025/12/01"), d("2025/12/31")));
        assert!(month_bounds(2025, 13).is_err());
    }

    #[test]
    fn canonical_key_format() {
        assert_eq!(
            canonical_key(d("2025/03/03"), "Auditorium", "period3"),
            "2025/03/03|Auditorium|period3"
        );
    }

    #[test]
    fn serde_uses_canonical_form() {
        let json = serde_json::to_string(&d("2025-03-03")).unwrap();
        assert_eq!(json, "\"2025/03/03\"");
        let back: CalendarDate = serde_json::from_str("\"2025-03-03\"").unwrap();
        assert_eq!(back, d("2025/03/03"));
        assert!(serde_json::from_str::<CalendarDate>("\"not a date\"").is_err());
    }
}
