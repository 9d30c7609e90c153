//! Typed, cached access to business-rule settings.
//!
//! Values are stored as text and typed on read. Anything missing, inactive
//! or malformed reads as absent, and the typed getters fall back to the
//! caller's default. The cache is coarse: any write clears all of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::clock::Clock;
use crate::limits::{MAX_SETTING_KEY_LEN, MAX_SETTING_VALUE_LEN};
use crate::model::{SettingStatus, SettingValue, SpaceType, ValueType};
use crate::store::{Store, StoreError};

pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(60);

pub mod keys {
    use crate::model::SpaceType;

    pub const AUTO_COMPLETE_HOUR: &str = "AUTO_COMPLETE_HOUR";
    pub const AUTO_COMPLETE_MINUTE: &str = "AUTO_COMPLETE_MINUTE";
    pub const OFFICE_OPEN_HOUR: &str = "OFFICE_OPEN_HOUR";
    pub const OFFICE_CLOSE_HOUR: &str = "OFFICE_CLOSE_HOUR";
    pub const RESERVATION_MIN_MINUTES: &str = "RESERVATION_MIN_MINUTES";
    pub const RESERVATION_STEP_MINUTES: &str = "RESERVATION_STEP_MINUTES";
    pub const MIN_HOURS_BEFORE: &str = "min_hours_before";

    /// JSON quota object for one space type, e.g. `SPACE_RULES_MEETING_ROOM`.
    pub fn space_rules(space_type: SpaceType) -> String {
        format!("SPACE_RULES_{}", space_type.as_str())
    }
}

/// A setting value after typing.
#[derive(Debug, Clone, PartialEq)]
pub enum Typed {
    Int(i64),
    Number(f64),
    Bool(bool),
    Json(serde_json::Value),
    Text(String),
}

impl Typed {
    pub fn value_type(&self) -> ValueType {
        match self {
            Typed::Int(_) => ValueType::Int,
            Typed::Number(_) => ValueType::Number,
            Typed::Bool(_) => ValueType::Bool,
            Typed::Json(_) => ValueType::Json,
            Typed::Text(_) => ValueType::String,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Typed::Int(v) => Some(*v),
            Typed::Number(v) => Some(v.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Typed::Int(v) => Some(*v as f64),
            Typed::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Typed::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Typed::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Typed::Text(v) => Some(v),
            _ => None,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Type a stored row. Inactive or malformed rows read as `None`.
pub fn parse(setting: &SettingValue) -> Option<Typed> {
    if setting.status == SettingStatus::Inactive {
        return None;
    }
    let raw = setting.value.as_str();
    match setting.value_type {
        ValueType::Int => match raw.trim().parse::<i64>() {
            Ok(v) => Some(Typed::Int(v)),
            Err(_) => parse_number(raw).map(|v| Typed::Int(v.trunc() as i64)),
        },
        ValueType::Number => parse_number(raw).map(Typed::Number),
        ValueType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Typed::Bool(true)),
            "false" | "0" => Some(Typed::Bool(false)),
            _ => None,
        },
        ValueType::Json => serde_json::from_str(raw).ok().map(Typed::Json),
        ValueType::String => Some(Typed::Text(raw.to_string())),
    }
}

struct CachedEntry {
    value: Option<Typed>,
    fetched_at: DateTime<Utc>,
}

pub struct SettingsProvider {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: DashMap<String, CachedEntry>,
    /// Bumped on every invalidation; fills started under an older generation are dropped.
    generation: AtomicU64,
}

impl SettingsProvider {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(60)),
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Typed values for whichever of `keys` are present and well-formed.
    pub async fn get(&self, keys: &[&str]) -> HashMap<String, Typed> {
        let now = self.clock.now();
        let mut out = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();

        for key in keys {
            match self.cache.get(*key) {
                Some(entry) if now - entry.fetched_at < self.ttl => {
                    metrics::counter!(crate::observability::SETTINGS_CACHE_HITS_TOTAL).increment(1);
                    if let Some(value) = &entry.value {
                        out.insert(key.to_string(), value.clone());
                    }
                }
                _ => misses.push(*key),
            }
        }

        if misses.is_empty() {
            return out;
        }
        metrics::counter!(crate::observability::SETTINGS_CACHE_MISSES_TOTAL).increment(misses.len() as u64);

        let generation = self.generation.load(Ordering::Acquire);
        let fetched: Vec<(String, Option<Typed>)> = {
            let tables = self.store.read().await;
            misses
                .iter()
                .map(|key| (key.to_string(), tables.setting(key).and_then(parse)))
                .collect()
        };

        let fresh = self.generation.load(Ordering::Acquire) == generation;
        for (key, value) in fetched {
            if let Some(v) = &value {
                out.insert(key.clone(), v.clone());
            }
            if fresh {
                self.cache.insert(key, CachedEntry { value, fetched_at: now });
            }
        }
        out
    }

    async fn get_one(&self, key: &str) -> Option<Typed> {
        self.get(&[key]).await.remove(key)
    }

    pub async fn get_int(&self, key: &str, fallback: i64) -> i64 {
        self.get_one(key).await.and_then(|v| v.as_i64()).unwrap_or(fallback)
    }

    pub async fn get_number(&self, key: &str, fallback: f64) -> f64 {
        self.get_one(key).await.and_then(|v| v.as_f64()).unwrap_or(fallback)
    }

    pub async fn get_bool(&self, key: &str, fallback: bool) -> bool {
        self.get_one(key).await.and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    pub async fn get_string(&self, key: &str, fallback: &str) -> String {
        match self.get_one(key).await {
            Some(Typed::Text(v)) => v,
            _ => fallback.to_string(),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.get_one(key).await {
            Some(Typed::Json(v)) => serde_json::from_value(v).unwrap_or(fallback),
            _ => fallback,
        }
    }

    /// Quota rules for one space type; absent fields are not enforced.
    pub async fn space_rules(&self, space_type: SpaceType) -> crate::engine::rules::TypeRules {
        match self.get_one(&keys::space_rules(space_type)).await {
            Some(Typed::Json(v)) => crate::engine::rules::TypeRules::from_json(space_type, &v),
            _ => Default::default(),
        }
    }

    /// Write (or reactivate) a setting and clear the cache.
    pub async fn set(&self, key: &str, value: &str, value_type: ValueType) -> Result<(), StoreError> {
        if key.is_empty() || key.len() > MAX_SETTING_KEY_LEN {
            return Err(StoreError::CheckViolation {
                constraint: "setting_key_length",
                message: format!("key length {}", key.len()),
            });
        }
        if value.len() > MAX_SETTING_VALUE_LEN {
            return Err(StoreError::CheckViolation {
                constraint: "setting_value_length",
                message: format!("value length {} for {key}", value.len()),
            });
        }
        let setting = SettingValue {
            key: key.to_string(),
            value: value.to_string(),
            value_type,
            status: SettingStatus::Active,
            updated_at: self.clock.now(),
        };
        let result = self.store.transaction(|tx| tx.write_setting(setting)).await;
        self.invalidate();
        result
    }

    /// Mark a setting INACTIVE. Returns false if it did not exist.
    pub async fn deactivate(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let result: Result<bool, StoreError> = self
            .store
            .transaction(|tx| {
                let Some(existing) = tx.setting(key).cloned() else {
                    return Ok(false);
                };
                tx.write_setting(SettingValue {
                    status: SettingStatus::Inactive,
                    updated_at: now,
                    ..existing
                })?;
                Ok(true)
            })
            .await;
        self.invalidate();
        result
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        debug!("settings cache invalidated");
    }
}
