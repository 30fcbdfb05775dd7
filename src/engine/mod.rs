mod conflict;
mod error;
mod expand;
mod mutations;
mod queries;
mod recommend;

pub use conflict::{Conflict, ConflictReport};
pub use error::{EngineError, ValidationError};
pub use expand::expand_dates;
pub use mutations::{BookingDraft, BookingRequest};

use std::sync::Arc;

use crate::catalog::{Catalog, Period};
use crate::model::FacilitySettings;
use crate::store::AvailabilityStore;

/// Behaviour switches for the two places where the booking rules leave a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Re-check slot vacancy inside the atomic write, closing the race between
    /// pre-flight and commit.
    pub guarded_commit: bool,
    /// Skip alternate-facility suggestions that are blacked out there.
    pub check_alternate_blackout: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            guarded_commit: true,
            check_alternate_blackout: true,
        }
    }
}

/// The booking engine. Stateless apart from its collaborators; every caller-specific
/// input (session, clock) is passed to each operation.
pub struct Engine {
    pub(super) store: Arc<dyn AvailabilityStore>,
    pub(super) catalog: Arc<Catalog>,
    pub(super) options: EngineOptions,
}

impl Engine {
    pub fn new(store: Arc<dyn AvailabilityStore>, catalog: Arc<Catalog>, options: EngineOptions) -> Self {
        Self {
            store,
            catalog,
            options,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<dyn AvailabilityStore> {
        &self.store
    }

    pub(super) fn require_facility(&self, facility: &str) -> Result<(), EngineError> {
        if self.catalog.has_facility(facility) {
            Ok(())
        } else {
            Err(ValidationError::UnknownFacility(facility.to_string()).into())
        }
    }

    pub(super) fn require_period(&self, period: &str) -> Result<&Period, EngineError> {
        self.catalog
            .period(period)
            .ok_or_else(|| ValidationError::UnknownPeriod(period.to_string()).into())
    }

    /// Blackout configuration of a facility; absent documents mean no blackouts.
    pub(super) async fn settings_for(&self, facility: &str) -> Result<FacilitySettings, EngineError> {
        Ok(self
            .store
            .query_facility_settings(facility)
            .await?
            .unwrap_or_default())
    }
}
