use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::limits::*;
use crate::model::{Ms, now_ms};
use crate::rate_limit::{RateLimitPolicy, RateLimiter};

/// Per-device rate limiters. Each device gets one limiter shared by all of its
/// connections, persisted as `{dir}/{device}.json` when a directory is set.
pub struct DeviceRegistry {
    limiters: DashMap<String, Arc<Mutex<RateLimiter>>>,
    dir: Option<PathBuf>,
    policy: RateLimitPolicy,
}

impl DeviceRegistry {
    pub fn new(dir: Option<PathBuf>, policy: RateLimitPolicy) -> io::Result<Self> {
        if let Some(dir) = &dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            limiters: DashMap::new(),
            dir,
            policy,
        })
    }

    /// Get or lazily load the limiter for a device.
    ///
    /// Device ids are used verbatim as file names, so only ASCII letters,
    /// digits, `_` and `-` are accepted.
    pub fn get_or_load(&self, device_id: &str) -> io::Result<Arc<Mutex<RateLimiter>>> {
        if let Some(limiter) = self.limiters.get(device_id) {
            return Ok(limiter.value().clone());
        }
        if device_id.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty device id",
            ));
        }
        if device_id.len() > MAX_DEVICE_ID_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "device id too long",
            ));
        }
        if !device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "device id may only contain letters, digits, '_' and '-'",
            ));
        }
        if self.limiters.len() >= MAX_DEVICES {
            self.evict_unused(now_ms());
            if self.limiters.len() >= MAX_DEVICES {
                return Err(io::Error::other("too many devices"));
            }
        }

        let limiter = match &self.dir {
            Some(dir) => RateLimiter::load(&dir.join(format!("{device_id}.json")), self.policy)?,
            None => RateLimiter::in_memory(self.policy),
        };
        let entry = self
            .limiters
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(limiter)));
        Ok(entry.value().clone())
    }

    /// Drop limiters no session holds. Without a directory a limiter with
    /// actions inside the trailing day is kept, since dropping it would
    /// forget them.
    fn evict_unused(&self, now: Ms) {
        let persisted = self.dir.is_some();
        let before = self.limiters.len();
        self.limiters.retain(|_, limiter| {
            let unused = Arc::strong_count(limiter) == 1
                && limiter
                    .try_lock()
                    .is_ok_and(|rl| persisted || rl.is_idle(now));
            !unused
        });
        let evicted = before.saturating_sub(self.limiters.len());
        if evicted > 0 {
            debug!("evicted {evicted} unused device limiters");
        }
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_devices").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn same_device_shares_limiter() {
        let reg = DeviceRegistry::new(None, RateLimitPolicy::default()).unwrap();
        let a = reg.get_or_load("dev_a").unwrap();
        let b = reg.get_or_load("dev_a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        a.lock().await.record(1).unwrap();
        assert_eq!(b.lock().await.records(), &[1]);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn limiter_file_persists_across_registries() {
        let dir = test_dir("persist");
        let reg = DeviceRegistry::new(Some(dir.clone()), RateLimitPolicy::default()).unwrap();
        let limiter = reg.get_or_load("dev_evil").unwrap();
        limiter.lock().await.record(42).unwrap();
        assert!(dir.join("dev_evil.json").exists());

        let reloaded = DeviceRegistry::new(Some(dir), RateLimitPolicy::default()).unwrap();
        let limiter = reloaded.get_or_load("dev_evil").unwrap();
        assert_eq!(limiter.lock().await.records(), &[42]);
    }

    #[test]
    fn rejects_bad_device_ids() {
        let reg = DeviceRegistry::new(None, RateLimitPolicy::default()).unwrap();
        assert!(reg.get_or_load("../..").is_err());
        assert!(reg.get_or_load("../evil").is_err());
        assert!(reg.get_or_load("").is_err());
        assert!(reg.get_or_load("d\u{e9}v").is_err());
        let long = "x".repeat(MAX_DEVICE_ID_LEN + 1);
        let err = reg.get_or_load(&long).unwrap_err();
        assert!(err.to_string().contains("device id too long"));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn ids_that_differ_only_in_punctuation_do_not_share_a_file() {
        let dir = test_dir("punctuation");
        let reg = DeviceRegistry::new(Some(dir.clone()), RateLimitPolicy::default()).unwrap();
        let err = reg.get_or_load("dev.a").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let deva = reg.get_or_load("deva").unwrap();
        deva.lock().await.record(7).unwrap();
        drop(reg);

        // after a restart the other id still starts clean
        let reg = DeviceRegistry::new(Some(dir), RateLimitPolicy::default()).unwrap();
        assert!(reg.get_or_load("dev.a").is_err());
        assert_eq!(reg.get_or_load("dev-a").unwrap().lock().await.records(), &[] as &[Ms]);
        assert_eq!(reg.get_or_load("deva").unwrap().lock().await.records(), &[7]);
    }

    #[tokio::test]
    async fn full_registry_evicts_unused_idle_limiters() {
        let reg = DeviceRegistry::new(None, RateLimitPolicy::default()).unwrap();
        let now = now_ms();
        reg.get_or_load("dev_busy")
            .unwrap()
            .lock()
            .await
            .record(now)
            .unwrap();
        for i in 1..MAX_DEVICES {
            reg.get_or_load(&format!("dev_{i}")).unwrap();
        }
        assert_eq!(reg.len(), MAX_DEVICES);

        let newcomer = reg.get_or_load("dev_newcomer").unwrap();
        assert!(reg.len() < MAX_DEVICES);
        assert!(Arc::strong_count(&newcomer) >= 2);
        // recent actions survive eviction
        assert_eq!(reg.get_or_load("dev_busy").unwrap().lock().await.records(), &[now]);
    }

    #[test]
    fn full_registry_refuses_while_every_limiter_is_held() {
        let reg = DeviceRegistry::new(None, RateLimitPolicy::default()).unwrap();
        let held: Vec<_> = (0..MAX_DEVICES)
            .map(|i| reg.get_or_load(&format!("dev_{i}")).unwrap())
            .collect();
        let err = reg.get_or_load("dev_newcomer").unwrap_err();
        assert!(err.to_string().contains("too many devices"));

        drop(held);
        assert!(reg.get_or_load("dev_newcomer").is_ok());
    }

    #[tokio::test]
    async fn persisted_limiters_are_evicted_and_reloaded() {
        let dir = test_dir("evict_persisted");
        let reg = DeviceRegistry::new(Some(dir), RateLimitPolicy::default()).unwrap();
        let now = now_ms();
        reg.get_or_load("dev_0").unwrap().lock().await.record(now).unwrap();
        for i in 1..MAX_DEVICES {
            reg.get_or_load(&format!("dev_{i}")).unwrap();
        }

        reg.get_or_load("dev_newcomer").unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get_or_load("dev_0").unwrap().lock().await.records(), &[now]);
    }
}
