use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

const WAL_FILE: &str = "coworkd.wal";

/// Process configuration from `COWORKD_*` environment variables.
/// Business rules are not configuration; they live in the settings store.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Offset of the office's local day from UTC.
    pub utc_offset_minutes: i32,
    pub settings_ttl: Duration,
    /// WAL frames since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            utc_offset_minutes: 0,
            settings_ttl: crate::settings::DEFAULT_TTL,
            compact_threshold: 1000,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("COWORKD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "COWORKD_METRICS_PORT"),
            utc_offset_minutes: parsed(&lookup, "COWORKD_UTC_OFFSET_MINUTES").unwrap_or(defaults.utc_offset_minutes),
            settings_ttl: parsed(&lookup, "COWORKD_SETTINGS_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.settings_ttl),
            compact_threshold: parsed(&lookup, "COWORKD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
        }
    }

    /// Out-of-range offsets fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }
}
