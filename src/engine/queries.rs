use chrono::NaiveTime;
use tracing::debug;

use crate::calendar::{self, CalendarDate};
use crate::catalog::Period;
use crate::limits::*;
use crate::model::{Booking, FacilitySettings, SlotState, SlotStatus};
use crate::store::BookingFilter;

use super::{Engine, EngineError, ValidationError};

impl Engine {
    pub async fn facility_settings(&self, facility: &str) -> Result<FacilitySettings, EngineError> {
        self.require_facility(facility)?;
        self.settings_for(facility).await
    }

    /// State of every period of `facility` on `date`, in catalog order.
    pub async fn slot_board(
        &self,
        date: CalendarDate,
        facility: &str,
    ) -> Result<Vec<SlotStatus>, EngineError> {
        self.require_facility(facility)?;
        let settings = self.settings_for(facility).await?;
        let bookings = self
            .store
            .query_by_date_range(date, date, &BookingFilter::facility(facility))
            .await?;

        let board = self
            .catalog
            .periods()
            .iter()
            .map(|p| {
                let state = if settings.blocks(date, &p.id) {
                    SlotState::Blackout
                } else if let Some(b) = bookings.iter().find(|b| b.claims(&p.id)) {
                    SlotState::Booked {
                        booker: b.booker.clone(),
                        booking_id: b.id,
                    }
                } else {
                    SlotState::Open
                };
                SlotStatus {
                    period: p.id.clone(),
                    state,
                }
            })
            .collect();
        Ok(board)
    }

    /// Live bookings in `[start, end]`, by date then earliest period.
    pub async fn list_bookings(
        &self,
        start: CalendarDate,
        end: CalendarDate,
        facility: Option<&str>,
    ) -> Result<Vec<Booking>, EngineError> {
        if end < start {
            return Err(ValidationError::InvertedRange { start, end }.into());
        }
        if start.days_until(end) >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let filter = match facility {
            Some(f) => {
                self.require_facility(f)?;
                BookingFilter::facility(f)
            }
            None => BookingFilter::any_facility(),
        };
        let mut bookings = self.store.query_by_date_range(start, end, &filter).await?;
        bookings.sort_by_key(|b| (b.date, self.first_period_index(b)));
        Ok(bookings)
    }

    /// Monday-to-Sunday week containing `date`.
    pub async fn week_bookings(
        &self,
        facility: &str,
        date: CalendarDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let monday = date.monday_of();
        self.list_bookings(monday, monday.add_days(6), Some(facility)).await
    }

    /// Every booking document of a month, cancelled ones included, newest date first.
    pub async fn month_history(&self, year: i32, month: u32) -> Result<Vec<Booking>, EngineError> {
        let (first, last) = calendar::month_bounds(year, month)?;
        let mut bookings = self
            .store
            .query_by_date_range(first, last, &BookingFilter::any_facility().with_empty())
            .await?;
        bookings.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(bookings)
    }

    /// Upcoming live bookings whose booker or reason contains `keyword`
    /// (case-insensitive) and/or that hold `period`.
    pub async fn search_bookings(
        &self,
        keyword: Option<&str>,
        period: Option<&str>,
        today: CalendarDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());
        if keyword.is_none() && period.is_none() {
            return Err(ValidationError::MissingSearchCriteria.into());
        }
        if let Some(k) = keyword
            && k.chars().count() > MAX_KEYWORD_LEN
        {
            return Err(ValidationError::KeywordTooLong(MAX_KEYWORD_LEN).into());
        }
        if let Some(p) = period {
            self.require_period(p)?;
        }

        let needle = keyword.map(str::to_lowercase);
        let horizon = today.add_days(SEARCH_HORIZON_DAYS);
        let mut found: Vec<Booking> = self
            .store
            .query_by_date_range(today, horizon, &BookingFilter::any_facility())
            .await?
            .into_iter()
            .filter(|b| {
                needle.as_deref().is_none_or(|n| {
                    b.booker.to_lowercase().contains(n) || b.reason.to_lowercase().contains(n)
                })
            })
            .filter(|b| period.is_none_or(|p| b.claims(p)))
            .collect();
        found.sort_by_key(|b| (b.date, self.first_period_index(b)));
        debug!("search {keyword:?}/{period:?}: {} hits", found.len());
        Ok(found)
    }

    pub fn current_period(&self, time: NaiveTime) -> Option<&Period> {
        self.catalog.current_period(time)
    }

    fn first_period_index(&self, booking: &Booking) -> usize {
        booking
            .periods
            .iter()
            .filter_map(|p| self.catalog.period_index(p))
            .min()
            .unwrap_or(usize::MAX)
    }
}
