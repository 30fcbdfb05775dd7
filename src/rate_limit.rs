//! Per-device sliding-window counters for booking actions.
//!
//! This is a courtesy throttle, not a security boundary: the record list lives with the
//! device and disappears when its file is deleted.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_per_hour: usize,
    pub max_per_day: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_hour: 5,
            max_per_day: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateDecision {
    Allowed,
    Denied { reason: String },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    /// Action timestamps, append-only apart from pruning.
    records: Vec<Ms>,
    path: Option<PathBuf>,
}

impl RateLimiter {
    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            records: Vec::new(),
            path: None,
        }
    }

    /// Load the record list persisted at `path`. A missing file is an empty list;
    /// an unreadable one is discarded.
    pub fn load(path: &Path, policy: RateLimitPolicy) -> io::Result<Self> {
        let records = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Vec<Ms>>(&raw).unwrap_or_else(|e| {
                warn!("discarding corrupt rate-limit file {}: {e}", path.display());
                Vec::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            policy,
            records,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn records(&self) -> &[Ms] {
        &self.records
    }

    /// True when no recorded action falls inside the trailing day, so the
    /// limiter holds nothing that `check` would count.
    pub fn is_idle(&self, now: Ms) -> bool {
        let day_ago = now - DAY_MS;
        self.records.iter().all(|t| *t <= day_ago)
    }

    /// Count actions in the trailing hour and day. Entries older than a day are
    /// pruned as a side effect.
    pub fn check(&mut self, now: Ms) -> RateDecision {
        let day_ago = now - DAY_MS;
        let hour_ago = now - HOUR_MS;

        let before = self.records.len();
        self.records.retain(|t| *t > day_ago);
        if self.records.len() != before
            && let Err(e) = self.persist()
        {
            warn!("failed to persist pruned rate-limit records: {e}");
        }

        let hourly = self.records.iter().filter(|t| **t > hour_ago).count();
        let daily = self.records.len();

        if hourly >= self.policy.max_per_hour {
            return RateDecision::Denied {
                reason: format!(
                    "at most {} bookings per hour, please try again later",
                    self.policy.max_per_hour
                ),
            };
        }
        if daily >= self.policy.max_per_day {
            return RateDecision::Denied {
                reason: format!(
                    "at most {} bookings per day, please try again tomorrow",
                    self.policy.max_per_day
                ),
            };
        }
        RateDecision::Allowed
    }

    /// Append one action and persist.
    pub fn record(&mut self, now: Ms) -> io::Result<()> {
        self.records.push(now);
        self.persist()
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec(&self.records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }
}
