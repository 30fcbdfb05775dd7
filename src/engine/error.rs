use thiserror::Error;
use ulid::Ulid;

use crate::calendar::{CalendarDate, ParseError};
use crate::store::StoreError;

/// Rejected input, detected before any store access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("booker name is required")]
    MissingBooker,
    #[error("booker name exceeds {0} characters")]
    BookerTooLong(usize),
    #[error("reason is required")]
    MissingReason,
    #[error("reason exceeds {0} characters")]
    ReasonTooLong(usize),
    #[error("select at least one period")]
    NoPeriods,
    #[error("unknown period: {0}")]
    UnknownPeriod(String),
    #[error("unknown facility: {0}")]
    UnknownFacility(String),
    #[error("no dates to book")]
    NoDates,
    #[error("{0} dates requested, at most {1} per batch")]
    TooManyDates(usize, usize),
    #[error("repeat end date {until} is before {start}")]
    RepeatEndsBeforeStart {
        start: CalendarDate,
        until: CalendarDate,
    },
    #[error("range end {end} is before start {start}")]
    InvertedRange {
        start: CalendarDate,
        end: CalendarDate,
    },
    #[error("invalid blackout slot: {0}")]
    InvalidSlot(String),
    #[error("search needs a keyword or a period")]
    MissingSearchCriteria,
    #[error("search keyword exceeds {0} characters")]
    KeywordTooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{facility} is closed for {period} on {date} ({weekday})", weekday = date.weekday_id())]
    FixedUnavailable {
        date: CalendarDate,
        facility: String,
        period: String,
    },
    #[error("{facility} {period} on {date} is already booked by {booker}")]
    AlreadyBooked {
        date: CalendarDate,
        facility: String,
        period: String,
        booker: String,
    },
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("booking {id} does not hold {}", period.as_deref().unwrap_or("any period"))]
    NotBooked { id: Ulid, period: Option<String> },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Stable machine-readable tag for the wire protocol and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::FixedUnavailable { .. } => "fixed_unavailable",
            EngineError::AlreadyBooked { .. } => "already_booked",
            EngineError::RateLimited(_) => "rate_limited",
            EngineError::Store(_) => "store",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::NotFound(_) => "not_found",
            EngineError::NotBooked { .. } => "not_booked",
            EngineError::Parse(_) => "parse",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::FixedUnavailable { .. } | EngineError::AlreadyBooked { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(msg) => EngineError::Store(msg),
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::SlotTaken {
                date,
                facility,
                period,
                booker,
            } => EngineError::AlreadyBooked {
                date,
                facility,
                period,
                booker,
            },
        }
    }
}

impl From<crate::model::InvalidSlot> for EngineError {
    fn from(e: crate::model::InvalidSlot) -> Self {
        EngineError::Validation(ValidationError::InvalidSlot(e.0))
    }
}
