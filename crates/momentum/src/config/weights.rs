use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

const DEFAULT_RISING_PCT: u8 = 70;
const DEFAULT_NEEDS_CARE_PCT: u8 = 45;

/// Immutable weight snapshot used to score one invocation or backfill run.
///
/// Built only through [`WeightConfig::new`] (or deserialization, which routes through the
/// same checks), so every instance has a positive cap and at least one positive weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightConfig {
    version: String,
    weights: BTreeMap<String, u32>,
    max_weight_per_day: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_events_per_type: Option<u32>,
    rising_threshold_pct: u8,
    needs_care_threshold_pct: u8,
}

impl WeightConfig {
    pub fn new<I, K>(
        version: impl Into<String>,
        weights: I,
        max_weight_per_day: i64,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        if max_weight_per_day <= 0 {
            return Err(ConfigError::MissingDailyCap);
        }
        let max_weight_per_day =
            u32::try_from(max_weight_per_day).map_err(|_| ConfigError::InvalidSetting {
                key: "max_weight_per_day",
                value: max_weight_per_day.to_string(),
            })?;

        let mut validated = BTreeMap::new();
        for (event_type, weight) in weights {
            let event_type = event_type.into();
            if weight <= 0 {
                return Err(ConfigError::NonPositiveWeight { event_type, weight });
            }
            let weight = u32::try_from(weight).map_err(|_| ConfigError::InvalidSetting {
                key: "weights",
                value: format!("{event_type}={weight}"),
            })?;
            if validated.contains_key(&event_type) {
                return Err(ConfigError::InvalidSetting {
                    key: "weights",
                    value: format!("duplicate entry for {event_type}"),
                });
            }
            validated.insert(event_type, weight);
        }
        if validated.is_empty() {
            return Err(ConfigError::NoEventWeights);
        }

        Ok(Self {
            version: version.into(),
            weights: validated,
            max_weight_per_day,
            max_events_per_type: None,
            rising_threshold_pct: DEFAULT_RISING_PCT,
            needs_care_threshold_pct: DEFAULT_NEEDS_CARE_PCT,
        })
    }

    /// Count at most `limit` events of each type towards the raw score.
    pub fn with_event_limit(mut self, limit: i64) -> Result<Self, ConfigError> {
        let limit = u32::try_from(limit)
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| ConfigError::InvalidSetting {
                key: "max_events_per_type",
                value: limit.to_string(),
            })?;
        self.max_events_per_type = Some(limit);
        Ok(self)
    }

    /// Override the momentum-state thresholds (percentages of the daily cap).
    pub fn with_thresholds(mut self, rising: u8, needs_care: u8) -> Result<Self, ConfigError> {
        if needs_care > rising || rising > 100 {
            return Err(ConfigError::InvalidThresholds { rising, needs_care });
        }
        self.rising_threshold_pct = rising;
        self.needs_care_threshold_pct = needs_care;
        Ok(self)
    }

    /// Product weight table shipped with the service.
    pub fn product_default() -> Self {
        let weights = [
            ("lesson_completion", 15),
            ("lesson_start", 5),
            ("journal_entry", 10),
            ("coach_interaction", 20),
            ("goal_setting", 12),
            ("goal_completion", 18),
            ("app_session", 3),
            ("streak_milestone", 25),
            ("assessment_completion", 15),
            ("resource_access", 5),
            ("peer_interaction", 8),
            ("reminder_response", 7),
        ];
        Self {
            version: "v1.0".to_string(),
            weights: weights
                .into_iter()
                .map(|(event_type, weight)| (event_type.to_string(), weight))
                .collect(),
            max_weight_per_day: 100,
            max_events_per_type: Some(5),
            rising_threshold_pct: DEFAULT_RISING_PCT,
            needs_care_threshold_pct: DEFAULT_NEEDS_CARE_PCT,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::WeightFormat)
    }

    /// Weight for a known event type; `None` for types this snapshot does not score.
    pub fn weight(&self, event_type: &str) -> Option<u32> {
        self.weights.get(event_type).copied()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn max_weight_per_day(&self) -> u32 {
        self.max_weight_per_day
    }

    /// Per-type event limit; `None` scores every event.
    pub fn max_events_per_type(&self) -> Option<u32> {
        self.max_events_per_type
    }

    pub fn rising_threshold_pct(&self) -> u8 {
        self.rising_threshold_pct
    }

    pub fn needs_care_threshold_pct(&self) -> u8 {
        self.needs_care_threshold_pct
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}

#[derive(Deserialize)]
struct WeightDocument {
    #[serde(default = "default_version")]
    version: String,
    max_weight_per_day: Option<i64>,
    #[serde(default)]
    weights: WeightEntries,
    max_events_per_type: Option<i64>,
    rising_threshold_pct: Option<u8>,
    needs_care_threshold_pct: Option<u8>,
}

/// Weight table in document order. Repeated keys are kept so construction can reject them.
#[derive(Default)]
struct WeightEntries(Vec<(String, i64)>);

impl<'de> Deserialize<'de> for WeightEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
            type Value = WeightEntries;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of event type to weight")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, i64>()? {
                    entries.push(entry);
                }
                Ok(WeightEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

fn default_version() -> String {
    "unversioned".to_string()
}

impl<'de> Deserialize<'de> for WeightConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let document = WeightDocument::deserialize(deserializer)?;
        let cap = document
            .max_weight_per_day
            .ok_or_else(|| serde::de::Error::custom(ConfigError::MissingDailyCap))?;
        let mut config = WeightConfig::new(document.version, document.weights.0, cap)
            .map_err(serde::de::Error::custom)?;

        match (
            document.rising_threshold_pct,
            document.needs_care_threshold_pct,
        ) {
            (None, None) => {}
            (rising, needs_care) => {
                config = config
                    .with_thresholds(
                        rising.unwrap_or(DEFAULT_RISING_PCT),
                        needs_care.unwrap_or(DEFAULT_NEEDS_CARE_PCT),
                    )
                    .map_err(serde::de::Error::custom)?;
            }
        }
        if let Some(limit) = document.max_events_per_type {
            config = config
                .with_event_limit(limit)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(config)
    }
}

/// Versioned origin of weight snapshots. Each call yields a complete snapshot; callers
/// hold on to it for the whole run.
pub trait WeightSource: Send + Sync {
    fn load(&self) -> Result<WeightConfig, ConfigError>;
}

/// Reads a JSON snapshot from disk on every load.
#[derive(Debug, Clone)]
pub struct FileWeightSource {
    path: PathBuf,
}

impl FileWeightSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WeightSource for FileWeightSource {
    fn load(&self) -> Result<WeightConfig, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| {
            ConfigError::WeightSource {
                path: self.path.clone(),
                source,
            }
        })?;
        WeightConfig::from_json_str(&raw)
    }
}

/// Always hands out the same snapshot.
#[derive(Debug, Clone)]
pub struct StaticWeightSource {
    config: WeightConfig,
}

impl StaticWeightSource {
    pub fn new(config: WeightConfig) -> Self {
        Self { config }
    }
}

impl WeightSource for StaticWeightSource {
    fn load(&self) -> Result<WeightConfig, ConfigError> {
        Ok(self.config.clone())
    }
}
