use serde::Deserialize;
use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar::CalendarDate;
use crate::limits::*;
use crate::model::{BlackoutSlot, Booking, FacilitySettings, Ms, NewBooking};
use crate::observability as obs;
use crate::rate_limit::RateDecision;
use crate::session::Session;
use crate::store::WriteOp;

use super::expand::expand_dates;
use super::{Engine, EngineError, ValidationError};

/// What is claimed on each date of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingDraft {
    pub facility: String,
    pub periods: Vec<String>,
    pub booker: String,
    pub reason: String,
}

/// A full booking request as submitted from the booking dialog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingRequest {
    pub date: CalendarDate,
    #[serde(flatten)]
    pub draft: BookingDraft,
    #[serde(default)]
    pub repeat_weekly_until: Option<CalendarDate>,
    #[serde(default)]
    pub extra_dates: Vec<CalendarDate>,
}

fn note_denial(session: &Session, reason: &str) {
    warn!("rate limit denied device {}: {reason}", session.auth.device_id());
    metrics::counter!(obs::RATE_LIMIT_DENIALS_TOTAL).increment(1);
}

fn note_recorded(session: &Session, recorded: std::io::Result<()>) {
    if let Err(e) = recorded {
        warn!("failed to persist rate-limit record for {}: {e}", session.auth.device_id());
    }
}

impl Engine {
    /// Trim text fields and put periods in catalog order without duplicates.
    pub fn normalize_draft(&self, draft: BookingDraft) -> Result<BookingDraft, EngineError> {
        let booker = draft.booker.trim().to_string();
        if booker.is_empty() {
            return Err(ValidationError::MissingBooker.into());
        }
        if booker.chars().count() > MAX_BOOKER_LEN {
            return Err(ValidationError::BookerTooLong(MAX_BOOKER_LEN).into());
        }
        let reason = draft.reason.trim().to_string();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(ValidationError::ReasonTooLong(MAX_REASON_LEN).into());
        }
        self.require_facility(&draft.facility)?;
        if draft.periods.is_empty() {
            return Err(ValidationError::NoPeriods.into());
        }

        let mut indexed = Vec::with_capacity(draft.periods.len());
        for period in draft.periods {
            let index = self
                .catalog
                .period_index(&period)
                .ok_or_else(|| ValidationError::UnknownPeriod(period.clone()))?;
            indexed.push((index, period));
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.dedup_by_key(|(index, _)| *index);

        Ok(BookingDraft {
            facility: draft.facility,
            periods: indexed.into_iter().map(|(_, p)| p).collect(),
            booker,
            reason,
        })
    }

    pub async fn check_rate_limit(&self, session: &Session, now: Ms) -> RateDecision {
        let decision = session.check_rate_limit(now).await;
        if let RateDecision::Denied { reason } = &decision {
            note_denial(session, reason);
        }
        decision
    }

    /// Count one booking action against the session's device.
    pub async fn record_booking(&self, session: &Session, now: Ms) -> Result<(), EngineError> {
        session
            .record_action(now)
            .await
            .map_err(|e| EngineError::Store(format!("rate-limit record: {e}")))
    }

    /// Check every date, then write one booking per date in a single atomic batch.
    ///
    /// Any conflict aborts the whole batch before anything is written. A successful
    /// batch counts as one rate-limited action.
    pub async fn commit_booking(
        &self,
        session: &Session,
        dates: &[CalendarDate],
        draft: BookingDraft,
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        let ids = self.write_batch(session, dates, draft).await?;
        note_recorded(session, session.record_action(now).await);
        Ok(ids)
    }

    async fn write_batch(
        &self,
        session: &Session,
        dates: &[CalendarDate],
        draft: BookingDraft,
    ) -> Result<Vec<Ulid>, EngineError> {
        let draft = self.normalize_draft(draft)?;
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();
        if dates.is_empty() {
            return Err(ValidationError::NoDates.into());
        }
        if dates.len() > MAX_BATCH_DATES {
            return Err(ValidationError::TooManyDates(dates.len(), MAX_BATCH_DATES).into());
        }

        let report = self.find_conflicts(&dates, &draft.facility, &draft.periods).await?;
        if let Some(conflict) = report.first() {
            warn!(
                "booking rejected for {} at {}: {} conflicts, first {conflict:?}",
                draft.booker,
                draft.facility,
                report.conflicts.len()
            );
            metrics::counter!(obs::CONFLICTS_TOTAL, "kind" => conflict.kind()).increment(1);
            return report.into_result().map(|()| Vec::new());
        }

        let mut ops = Vec::with_capacity(dates.len() * 2);
        if self.options.guarded_commit {
            ops.extend(dates.iter().map(|&date| WriteOp::RequireVacant {
                date,
                facility: draft.facility.clone(),
                periods: draft.periods.clone(),
            }));
        }
        ops.extend(dates.iter().map(|&date| {
            WriteOp::CreateBooking(NewBooking {
                date,
                facility: draft.facility.clone(),
                periods: draft.periods.clone(),
                booker: draft.booker.clone(),
                reason: draft.reason.clone(),
                device_id: session.auth.device_id().to_string(),
            })
        }));

        let ids = match self.store.atomic_batch_write(ops).await {
            Ok(ids) => ids,
            Err(e) => {
                let err = EngineError::from(e);
                if err.is_conflict() {
                    warn!("booking lost a race at commit: {err}");
                    metrics::counter!(obs::CONFLICTS_TOTAL, "kind" => err.kind()).increment(1);
                }
                return Err(err);
            }
        };

        info!(
            "{} booked {} {:?} on {} dates ({}..={})",
            draft.booker,
            draft.facility,
            draft.periods,
            ids.len(),
            dates[0],
            dates[dates.len() - 1]
        );
        metrics::counter!(obs::BATCHES_COMMITTED_TOTAL).increment(1);
        metrics::counter!(obs::BOOKINGS_COMMITTED_TOTAL).increment(ids.len() as u64);
        Ok(ids)
    }

    /// The whole booking-dialog flow: rate limit, validation, expansion, commit.
    ///
    /// The device's limiter stays locked from the check until the action is
    /// recorded, so concurrent submits from one device cannot both squeeze under
    /// the limit.
    pub async fn submit_booking(
        &self,
        session: &Session,
        request: BookingRequest,
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        let mut limiter = session.limiter().await;
        if let RateDecision::Denied { reason } = limiter.check(now) {
            note_denial(session, &reason);
            return Err(EngineError::RateLimited(reason));
        }
        let draft = self.normalize_draft(request.draft)?;
        let dates = expand_dates(request.date, request.repeat_weekly_until, &request.extra_dates)?;
        let ids = self.write_batch(session, &dates, draft).await?;
        note_recorded(session, limiter.record(now));
        Ok(ids)
    }

    /// Release one period of a booking, or all of them when `period` is `None`.
    ///
    /// Only the creating device or an administrator may cancel. The emptied booking
    /// stays in the store as a record.
    pub async fn cancel_booking_period(
        &self,
        session: &Session,
        id: Ulid,
        period: Option<&str>,
    ) -> Result<Booking, EngineError> {
        let booking = self.store.get_booking(id).await?.ok_or(EngineError::NotFound(id))?;
        if booking.device_id != session.auth.device_id() && !session.auth.is_administrator() {
            warn!(
                "device {} tried to cancel booking {id} owned by {}",
                session.auth.device_id(),
                booking.device_id
            );
            return Err(EngineError::PermissionDenied(
                "only the booking's device or an administrator may cancel it",
            ));
        }

        let remaining: Vec<String> = match period {
            Some(p) => {
                if !booking.claims(p) {
                    return Err(EngineError::NotBooked {
                        id,
                        period: Some(p.to_string()),
                    });
                }
                booking.periods.iter().filter(|q| *q != p).cloned().collect()
            }
            None => {
                if !booking.is_live() {
                    return Err(EngineError::NotBooked { id, period: None });
                }
                Vec::new()
            }
        };

        let updated = self.store.update_periods(id, remaining).await?;
        info!(
            "cancelled {} of booking {id} ({} {} {}), {} periods left",
            period.unwrap_or("all periods"),
            booking.facility,
            booking.date,
            booking.booker,
            updated.periods.len()
        );
        metrics::counter!(obs::CANCELLATIONS_TOTAL).increment(1);
        Ok(updated)
    }

    /// Replace a facility's blackout matrix. Administrators only.
    pub async fn save_facility_settings(
        &self,
        session: &Session,
        facility: &str,
        slots: Vec<String>,
        now: Ms,
    ) -> Result<FacilitySettings, EngineError> {
        if !session.auth.is_administrator() {
            warn!(
                "device {} tried to edit settings of {facility}",
                session.auth.device_id()
            );
            return Err(EngineError::PermissionDenied(
                "editing facility settings requires an administrator",
            ));
        }
        self.require_facility(facility)?;
        if slots.len() > MAX_BLACKOUT_SLOTS {
            return Err(EngineError::LimitExceeded("too many blackout slots"));
        }

        let mut parsed = Vec::with_capacity(slots.len());
        for raw in &slots {
            let slot: BlackoutSlot = raw.parse()?;
            let index = self
                .catalog
                .period_index(&slot.period)
                .ok_or_else(|| ValidationError::InvalidSlot(raw.clone()))?;
            parsed.push((slot.weekday.num_days_from_monday(), index, slot));
        }
        parsed.sort_by_key(|(day, index, _)| (*day, *index));
        parsed.dedup_by_key(|(day, index, _)| (*day, *index));

        let settings = FacilitySettings {
            unavailable_slots: parsed.into_iter().map(|(_, _, s)| s.to_string()).collect(),
            updated_at: Some(now),
        };
        self.store
            .atomic_batch_write(vec![WriteOp::PutFacilitySettings {
                facility: facility.to_string(),
                settings: settings.clone(),
            }])
            .await?;
        info!(
            "settings for {facility} saved: {} blackout slots",
            settings.unavailable_slots.len()
        );
        Ok(settings)
    }
}
