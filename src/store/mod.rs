//! The availability store contract and the bundled journal-backed implementation.

mod journal;

pub use journal::JournalStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::calendar::CalendarDate;
use crate::model::{Booking, FacilitySettings, NewBooking};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    /// A `RequireVacant` precondition failed inside an atomic batch.
    #[error("{date} {period} at {facility} is already booked by {booker}")]
    SlotTaken {
        date: CalendarDate,
        facility: String,
        period: String,
        booker: String,
    },
}

/// Equality filters for range queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub facility: Option<String>,
    /// Also return cancelled (empty) bookings.
    pub include_empty: bool,
}

impl BookingFilter {
    pub fn facility(name: impl Into<String>) -> Self {
        Self {
            facility: Some(name.into()),
            include_empty: false,
        }
    }

    pub fn any_facility() -> Self {
        Self::default()
    }

    pub fn with_empty(mut self) -> Self {
        self.include_empty = true;
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        (self.include_empty || booking.is_live())
            && self.facility.as_ref().is_none_or(|f| *f == booking.facility)
    }
}

/// One element of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Creates a booking; the store assigns its id and `created_at`.
    CreateBooking(NewBooking),
    /// Fails the whole batch if any live booking claims one of `periods`.
    RequireVacant {
        date: CalendarDate,
        facility: String,
        periods: Vec<String>,
    },
    PutFacilitySettings {
        facility: String,
        settings: FacilitySettings,
    },
}

/// Everything the engine needs from persistence. Every method is one round-trip.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Bookings with `start <= date <= end` matching `filter`, by date then insertion order.
    async fn query_by_date_range(
        &self,
        start: CalendarDate,
        end: CalendarDate,
        filter: &BookingFilter,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn query_facility_settings(
        &self,
        facility: &str,
    ) -> Result<Option<FacilitySettings>, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// All ops apply or none do. Returns the ids of created bookings in op order.
    async fn atomic_batch_write(&self, ops: Vec<WriteOp>) -> Result<Vec<Ulid>, StoreError>;

    /// Replace the period list of one booking and return the updated document.
    async fn update_periods(&self, id: Ulid, periods: Vec<String>) -> Result<Booking, StoreError>;
}
