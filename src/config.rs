use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Runtime settings. Defaults match a small studio deployment; every field can
/// be overridden from `ROOMSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Slot query horizon when the caller gives none.
    pub default_horizon_days: u32,
    /// Upper clamp for the slot query horizon.
    pub max_horizon_days: u32,
    /// Bounded wait for confirmation delivery.
    #[serde(with = "millis")]
    pub notify_timeout: Duration,
    /// Used for tenants that carry no timezone.
    pub default_timezone: String,
    /// WAL directory. `None` keeps the ledger in memory.
    pub data_dir: Option<PathBuf>,
    /// Appends after which the compactor rewrites the WAL.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_horizon_days: DEFAULT_HORIZON_DAYS,
            max_horizon_days: MAX_HORIZON_DAYS,
            notify_timeout: Duration::from_secs(10),
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            data_dir: None,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_horizon_days = env_parse("ROOMSLOT_MAX_HORIZON_DAYS")
            .unwrap_or(defaults.max_horizon_days)
            .clamp(MIN_HORIZON_DAYS, MAX_HORIZON_DAYS);
        let default_horizon_days = env_parse("ROOMSLOT_DEFAULT_HORIZON_DAYS")
            .unwrap_or(defaults.default_horizon_days)
            .clamp(MIN_HORIZON_DAYS, max_horizon_days);

        Self {
            default_horizon_days,
            max_horizon_days,
            notify_timeout: env_parse("ROOMSLOT_NOTIFY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_timeout),
            default_timezone: std::env::var("ROOMSLOT_DEFAULT_TIMEZONE")
                .unwrap_or(defaults.default_timezone),
            data_dir: std::env::var("ROOMSLOT_DATA_DIR").ok().map(PathBuf::from),
            compact_threshold: env_parse("ROOMSLOT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: env_parse("ROOMSLOT_METRICS_PORT"),
        }
    }

    /// Clamp a requested horizon into `[1, max_horizon_days]`.
    pub fn horizon_days(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_horizon_days)
            .clamp(MIN_HORIZON_DAYS, self.max_horizon_days)
    }

    /// WAL file for the ledger, if durability is configured.
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("roomslot.wal"))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
