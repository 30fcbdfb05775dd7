use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::engine::EngineOptions;
use crate::rate_limit::RateLimitPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{var}: cannot parse {value:?} as {expected}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Daemon settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_password: Option<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub catalog_path: Option<PathBuf>,
    pub rate_limit: RateLimitPolicy,
    pub engine: EngineOptions,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            admin_password: None,
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            catalog_path: None,
            rate_limit: RateLimitPolicy::default(),
            engine: EngineOptions::default(),
            log_filter: "info".into(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(
        &self,
        var: &'static str,
        expected: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        match self.string(var) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError {
                    var,
                    value,
                    expected,
                }),
        }
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.string(var) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError {
                    var,
                    value,
                    expected: "a boolean",
                }),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let d = Config::default();
        Ok(Self {
            bind: env.string("SLOTBOOK_BIND").unwrap_or(d.bind),
            port: env.parsed("SLOTBOOK_PORT", "a port number")?.unwrap_or(d.port),
            data_dir: env
                .string("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            admin_password: env.string("SLOTBOOK_ADMIN_PASSWORD"),
            max_connections: env
                .parsed("SLOTBOOK_MAX_CONNECTIONS", "a connection count")?
                .unwrap_or(d.max_connections),
            compact_threshold: env
                .parsed("SLOTBOOK_COMPACT_THRESHOLD", "an append count")?
                .unwrap_or(d.compact_threshold),
            metrics_port: env.parsed("SLOTBOOK_METRICS_PORT", "a port number")?,
            catalog_path: env.string("SLOTBOOK_CATALOG").map(PathBuf::from),
            rate_limit: RateLimitPolicy {
                max_per_hour: env
                    .parsed("SLOTBOOK_MAX_PER_HOUR", "a count")?
                    .unwrap_or(d.rate_limit.max_per_hour),
                max_per_day: env
                    .parsed("SLOTBOOK_MAX_PER_DAY", "a count")?
                    .unwrap_or(d.rate_limit.max_per_day),
            },
            engine: EngineOptions {
                guarded_commit: env
                    .flag("SLOTBOOK_GUARDED_COMMIT")?
                    .unwrap_or(d.engine.guarded_commit),
                check_alternate_blackout: env
                    .flag("SLOTBOOK_CHECK_ALTERNATE_BLACKOUT")?
                    .unwrap_or(d.engine.check_alternate_blackout),
            },
            log_filter: env.string("SLOTBOOK_LOG").unwrap_or(d.log_filter),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.data_dir.join("devices")
    }
}
