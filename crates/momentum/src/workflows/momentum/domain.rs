use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::aggregate::ScoreBreakdown;

/// Opaque user identifier as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Caller-supplied identifier, trimmed; blank input is rejected.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::BlankUserId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Caller input problems. Reported immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("'{value}' is not a valid ISO-8601 date (expected YYYY-MM-DD)")]
    MalformedDate { value: String },
    #[error("user_id must not be blank")]
    BlankUserId,
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("requested range covers {days} days; the limit is {limit}")]
    RangeTooLong { days: i64, limit: u32 },
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_iso_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| ValidationError::MalformedDate {
        value: raw.to_string(),
    })
}

/// A single committed user action. Produced by client SDKs; the pipeline only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub user_id: UserId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl EngagementEvent {
    pub fn new(
        user_id: impl Into<UserId>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Identity of one score row and of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScoreKey {
    pub user_id: UserId,
    pub date: NaiveDate,
}

impl ScoreKey {
    pub fn new(user_id: impl Into<UserId>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.date)
    }
}

/// Coarse momentum band derived from the capped score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumState {
    Rising,
    Steady,
    NeedsCare,
}

impl MomentumState {
    pub fn label(&self) -> &'static str {
        match self {
            MomentumState::Rising => "Rising",
            MomentumState::Steady => "Steady",
            MomentumState::NeedsCare => "NeedsCare",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Rising" => Some(Self::Rising),
            "Steady" => Some(Self::Steady),
            "NeedsCare" => Some(Self::NeedsCare),
            _ => None,
        }
    }
}

/// The single authoritative row per (user, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMomentumScore {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub score: u32,
    pub event_count: u32,
    pub computed_at: DateTime<Utc>,
    pub version: u64,
    pub config_version: String,
    pub momentum_state: MomentumState,
    pub breakdown: ScoreBreakdown,
}

impl DailyMomentumScore {
    pub fn key(&self) -> ScoreKey {
        ScoreKey::new(self.user_id.clone(), self.date)
    }

    pub fn view(&self) -> ScoreView {
        ScoreView {
            user_id: self.user_id.clone(),
            date: self.date,
            score: self.score,
            event_count: self.event_count,
            version: self.version,
            momentum_state: self.momentum_state,
            config_version: self.config_version.clone(),
        }
    }
}

/// Response shape for compute triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreView {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub score: u32,
    pub event_count: u32,
    pub version: u64,
    pub momentum_state: MomentumState,
    pub config_version: String,
}
