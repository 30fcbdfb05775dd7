use tracing::debug;

use crate::calendar::CalendarDate;
use crate::model::{Booking, FacilitySettings, Suggestion, SuggestionKind};
use crate::observability as obs;
use crate::store::BookingFilter;

use super::conflict::is_booked;
use super::{Engine, EngineError};

/// Days searched on each side of the target date.
const DATE_RADIUS: i64 = 7;
/// Periods searched on each side of the target period.
const PERIOD_OFFSETS: [i64; 4] = [-2, -1, 1, 2];
const MAX_SUGGESTIONS: usize = 3;

const SIMILAR_FACILITY_SCORE: i32 = 95;
const OTHER_FACILITY_SCORE: i32 = 80;

fn date_score(offset: i64) -> i32 {
    100 - 5 * offset as i32
}

fn period_score(offset: i64) -> i32 {
    90 - 10 * offset.abs() as i32
}

fn is_open(
    settings: &FacilitySettings,
    bookings: &[Booking],
    date: CalendarDate,
    facility: &str,
    period: &str,
) -> bool {
    !settings.blocks(date, period) && !is_booked(bookings, date, facility, period)
}

fn days_phrase(n: i64, direction: &str) -> String {
    if n == 1 {
        format!("1 day {direction}, same period")
    } else {
        format!("{n} days {direction}, same period")
    }
}

impl Engine {
    /// Up to three open alternatives to an occupied (date, period, facility), best first.
    ///
    /// Candidates come from three strategies in this order: same facility on nearby
    /// dates, same slot at another facility, same facility at nearby periods. The
    /// sort is stable, so equal scores keep that order. Bookings for the whole
    /// neighbourhood are fetched with one range query.
    pub async fn suggest_alternatives(
        &self,
        date: CalendarDate,
        period: &str,
        facility: &str,
        today: CalendarDate,
    ) -> Result<Vec<Suggestion>, EngineError> {
        self.require_facility(facility)?;
        self.require_period(period)?;
        let bookings = self
            .store
            .query_by_date_range(
                date.add_days(-DATE_RADIUS),
                date.add_days(DATE_RADIUS),
                &BookingFilter::any_facility(),
            )
            .await?;
        let settings = self.settings_for(facility).await?;
        let mut pool = Vec::new();

        for offset in 1..=DATE_RADIUS {
            let earlier = date.add_days(-offset);
            if earlier > today && is_open(&settings, &bookings, earlier, facility, period) {
                pool.push(Suggestion {
                    kind: SuggestionKind::Date,
                    date: earlier,
                    period: period.to_string(),
                    facility: facility.to_string(),
                    score: date_score(offset),
                    description: days_phrase(offset, "earlier"),
                });
            }
            let later = date.add_days(offset);
            if is_open(&settings, &bookings, later, facility, period) {
                pool.push(Suggestion {
                    kind: SuggestionKind::Date,
                    date: later,
                    period: period.to_string(),
                    facility: facility.to_string(),
                    score: date_score(offset),
                    description: days_phrase(offset, "later"),
                });
            }
        }

        let similar = self.catalog.similar_to(facility);
        let candidates: Vec<String> = match similar {
            Some(class) => class.to_vec(),
            None => self.catalog.facilities().to_vec(),
        };
        for other in candidates.iter().filter(|f| *f != facility) {
            if is_booked(&bookings, date, other, period) {
                continue;
            }
            if self.options.check_alternate_blackout
                && self.settings_for(other).await?.blocks(date, period)
            {
                continue;
            }
            let in_class = similar.is_some_and(|class| class.contains(other));
            pool.push(Suggestion {
                kind: SuggestionKind::Facility,
                date,
                period: period.to_string(),
                facility: other.clone(),
                score: if in_class {
                    SIMILAR_FACILITY_SCORE
                } else {
                    OTHER_FACILITY_SCORE
                },
                description: format!("{other} is free at the same time"),
            });
        }

        let periods = self.catalog.periods();
        if let Some(index) = self.catalog.period_index(period) {
            for offset in PERIOD_OFFSETS {
                let Some(neighbour) = index
                    .checked_add_signed(offset as isize)
                    .and_then(|i| periods.get(i))
                else {
                    continue;
                };
                if is_open(&settings, &bookings, date, facility, &neighbour.id) {
                    pool.push(Suggestion {
                        kind: SuggestionKind::Period,
                        date,
                        period: neighbour.id.clone(),
                        facility: facility.to_string(),
                        score: period_score(offset),
                        description: format!(
                            "same day, {} ({})",
                            neighbour.name,
                            neighbour.time_range()
                        ),
                    });
                }
            }
        }

        debug!(
            "alternatives for {facility} {period} on {date}: {} candidates",
            pool.len()
        );
        pool.sort_by(|a, b| b.score.cmp(&a.score));
        pool.truncate(MAX_SUGGESTIONS);
        metrics::histogram!(obs::SUGGESTIONS_RETURNED).record(pool.len() as f64);
        Ok(pool)
    }
}
