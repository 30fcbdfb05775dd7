use std::collections::BTreeSet;

use crate::calendar::CalendarDate;
use crate::limits::MAX_BATCH_DATES;

use super::{EngineError, ValidationError};

/// Expand a request into the ascending, duplicate-free set of dates it claims.
///
/// Weekly repetition applies to `primary` only: it advances 7 days at a time while
/// the date stays on or before `repeat_until`. `extra` dates are taken verbatim.
pub fn expand_dates(
    primary: CalendarDate,
    repeat_until: Option<CalendarDate>,
    extra: &[CalendarDate],
) -> Result<Vec<CalendarDate>, EngineError> {
    let mut dates = BTreeSet::from([primary]);

    if let Some(until) = repeat_until {
        if until < primary {
            return Err(ValidationError::RepeatEndsBeforeStart {
                start: primary,
                until,
            }
            .into());
        }
        let mut next = primary.add_days(7);
        while next <= until {
            dates.insert(next);
            if dates.len() > MAX_BATCH_DATES {
                return Err(too_many(primary, until, extra));
            }
            next = next.add_days(7);
        }
    }

    dates.extend(extra.iter().copied());
    if dates.len() > MAX_BATCH_DATES {
        return Err(ValidationError::TooManyDates(dates.len(), MAX_BATCH_DATES).into());
    }
    Ok(dates.into_iter().collect())
}

fn too_many(primary: CalendarDate, until: CalendarDate, extra: &[CalendarDate]) -> EngineError {
    let weeks = primary.days_until(until) / 7 + 1;
    let requested = usize::try_from(weeks).unwrap_or(usize::MAX).saturating_add(extra.len());
    ValidationError::TooManyDates(requested, MAX_BATCH_DATES).into()
}
