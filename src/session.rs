use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::auth::AuthContext;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::model::Ms;

/// Everything the engine needs to know about the caller of one operation.
#[derive(Debug, Clone)]
pub struct Session {
    pub auth: AuthContext,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl Session {
    pub fn new(auth: AuthContext, limiter: RateLimiter) -> Self {
        Self::shared(auth, Arc::new(Mutex::new(limiter)))
    }

    /// Share one limiter between every connection of the same device.
    pub fn shared(auth: AuthContext, limiter: Arc<Mutex<RateLimiter>>) -> Self {
        Self { auth, limiter }
    }

    pub async fn check_rate_limit(&self, now: Ms) -> RateDecision {
        self.limiter.lock().await.check(now)
    }

    /// Hold the device's limiter, so a check and the matching record are not
    /// interleaved with another connection of the same device.
    pub async fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter.lock().await
    }

    pub async fn record_action(&self, now: Ms) -> std::io::Result<()> {
        self.limiter.lock().await.record(now)
    }

    pub async fn recorded_actions(&self) -> Vec<Ms> {
        self.limiter.lock().await.records().to_vec()
    }
}
