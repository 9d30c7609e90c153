use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::limits::MAX_MIN_HOURS_BEFORE;
use crate::model::SpaceType;
use crate::settings::{keys, SettingsProvider};

/// Per-space-type quotas. `None` means the limit is not enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeRules {
    pub max_hours_per_day_per_user: Option<f64>,
    pub max_hours_per_week_per_user: Option<f64>,
    pub max_spaces_per_day_per_user: Option<u32>,
    pub max_overlapping_spaces_per_user: Option<u32>,
}

fn rule_field<T>(
    space_type: SpaceType,
    fields: &Map<String, Value>,
    name: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = fields.get(name).filter(|v| !v.is_null())?;
    let parsed = parse(value);
    if parsed.is_none() {
        warn!(%space_type, field = name, %value, "ignoring malformed space rule");
    }
    parsed
}

impl TypeRules {
    /// Fields are read one by one; a malformed field only disables its own limit.
    pub fn from_json(space_type: SpaceType, json: &Value) -> Self {
        let Some(fields) = json.as_object() else {
            warn!(%space_type, value = %json, "space rules are not a JSON object, ignoring");
            return Self::default();
        };
        let hours = |name: &str| rule_field(space_type, fields, name, |v| v.as_f64().filter(|h| h.is_finite() && *h >= 0.0));
        let count = |name: &str| rule_field(space_type, fields, name, |v| v.as_u64().and_then(|n| u32::try_from(n).ok()));

        Self {
            max_hours_per_day_per_user: hours("maxHoursPerDayPerUser"),
            max_hours_per_week_per_user: hours("maxHoursPerWeekPerUser"),
            max_spaces_per_day_per_user: count("maxSpacesPerDayPerUser"),
            max_overlapping_spaces_per_user: count("maxOverlappingSpacesPerUser"),
        }
    }
}

/// Every rule a booking is checked against, read once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRules {
    /// Minimum lead time between now and the reservation start.
    pub min_hours_before: f64,
    pub office_open_hour: u32,
    /// 24 means midnight at the end of the day; an end time of `24:00` is accepted.
    pub office_close_hour: u32,
    /// 0 disables.
    pub min_minutes: i64,
    /// 0 disables.
    pub step_minutes: i64,
    pub per_type: HashMap<SpaceType, TypeRules>,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_hours_before: 0.0,
            office_open_hour: 0,
            office_close_hour: 24,
            min_minutes: 0,
            step_minutes: 0,
            per_type: HashMap::new(),
        }
    }
}

impl BookingRules {
    pub async fn load(settings: &SettingsProvider) -> Self {
        let type_keys: Vec<(SpaceType, String)> = SpaceType::ALL
            .into_iter()
            .map(|t| (t, keys::space_rules(t)))
            .collect();
        let mut wanted = vec![
            keys::MIN_HOURS_BEFORE,
            keys::OFFICE_OPEN_HOUR,
            keys::OFFICE_CLOSE_HOUR,
            keys::RESERVATION_MIN_MINUTES,
            keys::RESERVATION_STEP_MINUTES,
        ];
        wanted.extend(type_keys.iter().map(|(_, k)| k.as_str()));
        let values = settings.get(&wanted).await;

        let defaults = Self::default();
        let int = |key: &str, fallback: i64| values.get(key).and_then(|v| v.as_i64()).unwrap_or(fallback);

        let per_type = type_keys
            .iter()
            .filter_map(|(t, key)| {
                let json = values.get(key)?.as_json()?;
                Some((*t, TypeRules::from_json(*t, json)))
            })
            .collect();

        Self {
            min_hours_before: values
                .get(keys::MIN_HOURS_BEFORE)
                .and_then(|v| v.as_f64())
                .filter(|h| (0.0..=MAX_MIN_HOURS_BEFORE).contains(h))
                .unwrap_or(defaults.min_hours_before),
            office_open_hour: int(keys::OFFICE_OPEN_HOUR, defaults.office_open_hour as i64).clamp(0, 23) as u32,
            office_close_hour: int(keys::OFFICE_CLOSE_HOUR, defaults.office_close_hour as i64).clamp(1, 24) as u32,
            min_minutes: int(keys::RESERVATION_MIN_MINUTES, defaults.min_minutes).max(0),
            step_minutes: int(keys::RESERVATION_STEP_MINUTES, defaults.step_minutes).max(0),
            per_type,
        }
    }

    pub fn for_type(&self, space_type: SpaceType) -> TypeRules {
        self.per_type.get(&space_type).cloned().unwrap_or_default()
    }
}
