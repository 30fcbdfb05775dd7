use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::calendar::CalendarDate;
use crate::limits::MAX_BATCH_DATES;
use crate::model::{Booking, FacilitySettings};
use crate::store::BookingFilter;

use super::{Engine, EngineError, ValidationError};

/// One rejected (date, period) claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    FixedUnavailable {
        date: CalendarDate,
        facility: String,
        period: String,
    },
    AlreadyBooked {
        date: CalendarDate,
        facility: String,
        period: String,
        booker: String,
        booking_id: Ulid,
    },
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::FixedUnavailable { .. } => "fixed_unavailable",
            Conflict::AlreadyBooked { .. } => "already_booked",
        }
    }
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        match c {
            Conflict::FixedUnavailable {
                date,
                facility,
                period,
            } => EngineError::FixedUnavailable {
                date,
                facility,
                period,
            },
            Conflict::AlreadyBooked {
                date,
                facility,
                period,
                booker,
                ..
            } => EngineError::AlreadyBooked {
                date,
                facility,
                period,
                booker,
            },
        }
    }
}

/// Conflicts in discovery order: by candidate date, then by requested period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn first(&self) -> Option<&Conflict> {
        self.conflicts.first()
    }

    /// `Err` with the first conflict, if any.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self.conflicts.into_iter().next() {
            Some(conflict) => Err(conflict.into()),
            None => Ok(()),
        }
    }
}

pub(crate) fn blackout_conflicts(
    settings: &FacilitySettings,
    dates: &[CalendarDate],
    facility: &str,
    periods: &[String],
) -> Vec<Conflict> {
    let mut found = Vec::new();
    for &date in dates {
        for period in periods {
            if settings.blocks(date, period) {
                found.push(Conflict::FixedUnavailable {
                    date,
                    facility: facility.to_string(),
                    period: period.clone(),
                });
            }
        }
    }
    found
}

/// `bookings` may include other dates and facilities; only `dates` at `facility` count.
pub(crate) fn booking_conflicts(
    bookings: &[Booking],
    dates: &[CalendarDate],
    facility: &str,
    periods: &[String],
) -> Vec<Conflict> {
    let mut found = Vec::new();
    for &date in dates {
        for period in periods {
            let holder = bookings
                .iter()
                .find(|b| b.date == date && b.facility == facility && b.claims(period));
            if let Some(b) = holder {
                found.push(Conflict::AlreadyBooked {
                    date,
                    facility: facility.to_string(),
                    period: period.clone(),
                    booker: b.booker.clone(),
                    booking_id: b.id,
                });
            }
        }
    }
    found
}

/// True if a live booking among `bookings` holds `period` at `facility` on `date`.
pub(crate) fn is_booked(bookings: &[Booking], date: CalendarDate, facility: &str, period: &str) -> bool {
    bookings
        .iter()
        .any(|b| b.date == date && b.facility == facility && b.claims(period))
}

impl Engine {
    /// Pre-flight check of `periods` at `facility` on every date in `dates`.
    ///
    /// Blackouts are checked first; if any hit, bookings are not queried at all.
    /// Bookings for the whole candidate span come from a single range query.
    pub async fn find_conflicts(
        &self,
        dates: &[CalendarDate],
        facility: &str,
        periods: &[String],
    ) -> Result<ConflictReport, EngineError> {
        self.require_facility(facility)?;
        for period in periods {
            self.require_period(period)?;
        }
        let dates: Vec<CalendarDate> = dates.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if dates.len() > MAX_BATCH_DATES {
            return Err(ValidationError::TooManyDates(dates.len(), MAX_BATCH_DATES).into());
        }
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            return Ok(ConflictReport::default());
        };
        if periods.is_empty() {
            return Ok(ConflictReport::default());
        }

        let settings = self.settings_for(facility).await?;
        let blackouts = blackout_conflicts(&settings, &dates, facility, periods);
        if !blackouts.is_empty() {
            debug!("{} blackout conflicts at {facility}", blackouts.len());
            return Ok(ConflictReport { conflicts: blackouts });
        }

        let bookings = self
            .store
            .query_by_date_range(first, last, &BookingFilter::facility(facility))
            .await?;
        let conflicts = booking_conflicts(&bookings, &dates, facility, periods);
        debug!(
            "{} dates at {facility}: {} bookings scanned, {} conflicts",
            dates.len(),
            bookings.len(),
            conflicts.len()
        );
        Ok(ConflictReport { conflicts })
    }
}
