use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::calendar::{self, CalendarDate};

/// Unix milliseconds.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// A committed claim on one or more periods of one facility on one date.
///
/// A booking whose `periods` is empty has been cancelled; it is kept for the record
/// but never takes part in conflict checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub date: CalendarDate,
    pub facility: String,
    pub periods: Vec<String>,
    pub booker: String,
    pub reason: String,
    pub device_id: String,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        !self.periods.is_empty()
    }

    pub fn claims(&self, period_id: &str) -> bool {
        self.periods.iter().any(|p| p == period_id)
    }
}

/// Booking fields supplied by the caller; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub date: CalendarDate,
    pub facility: String,
    pub periods: Vec<String>,
    pub booker: String,
    pub reason: String,
    pub device_id: String,
}

impl NewBooking {
    pub fn into_booking(self, id: Ulid, created_at: Ms) -> Booking {
        Booking {
            id,
            date: self.date,
            facility: self.facility,
            periods: self.periods,
            booker: self.booker,
            reason: self.reason,
            device_id: self.device_id,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid blackout slot {0:?}: expected {{weekday}}_{{periodId}}")]
pub struct InvalidSlot(pub String);

/// A (weekday, period) pair a facility never opens. Text form `{weekday}_{periodId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlackoutSlot {
    pub weekday: Weekday,
    pub period: String,
}

impl BlackoutSlot {
    pub fn new(weekday: Weekday, period: impl Into<String>) -> Self {
        Self {
            weekday,
            period: period.into(),
        }
    }

    pub fn for_date(date: CalendarDate, period: &str) -> Self {
        Self::new(date.weekday(), period)
    }
}

impl fmt::Display for BlackoutSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", calendar::weekday_id(self.weekday), self.period)
    }
}

impl FromStr for BlackoutSlot {
    type Err = InvalidSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (day, period) = s.split_once('_').ok_or_else(|| InvalidSlot(s.to_string()))?;
        let weekday = calendar::parse_weekday_id(day).ok_or_else(|| InvalidSlot(s.to_string()))?;
        if period.is_empty() {
            return Err(InvalidSlot(s.to_string()));
        }
        Ok(Self::new(weekday, period))
    }
}

/// Per-facility configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitySettings {
    /// Entries of the form `{weekday}_{periodId}`.
    pub unavailable_slots: Vec<String>,
    pub updated_at: Option<Ms>,
}

impl FacilitySettings {
    /// True if `period` is permanently closed on `date`'s weekday.
    pub fn blocks(&self, date: CalendarDate, period: &str) -> bool {
        let key = BlackoutSlot::for_date(date, period).to_string();
        self.unavailable_slots.iter().any(|s| *s == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Same facility and period, nearby date.
    Date,
    /// Same date and period, another facility.
    Facility,
    /// Same date and facility, nearby period.
    Period,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub date: CalendarDate,
    pub period: String,
    pub facility: String,
    pub score: i32,
    pub description: String,
}

/// State of one period cell for a date and facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Open,
    Blackout,
    Booked { booker: String, booking_id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub period: String,
    #[serde(flatten)]
    pub state: SlotState,
}

/// Journal record. Each record is one atomic unit on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BatchCommitted {
        bookings: Vec<Booking>,
        settings: Vec<(String, FacilitySettings)>,
    },
    BookingPeriodsUpdated {
        id: Ulid,
        periods: Vec<String>,
    },
}
