//! Pure scoring: events plus a weight snapshot in, capped score out. No I/O happens here so
//! live runs, retries, and backfills all agree on the result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{EngagementEvent, MomentumState};
use crate::config::WeightConfig;

/// Per-type audit trail persisted next to the score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub raw_score: u64,
    pub events_by_type: BTreeMap<String, u32>,
    pub points_by_type: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_event_types: Vec<String>,
}

/// Everything the writer needs from one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyAggregate {
    pub score: u32,
    pub event_count: u32,
    pub momentum_state: MomentumState,
    pub breakdown: ScoreBreakdown,
}

/// `(score, event_count)` for a day's events. Unknown event types weigh zero, and with a
/// per-type limit set only the first `limit` events of each type earn points.
pub fn aggregate(events: &[EngagementEvent], config: &WeightConfig) -> (u32, u32) {
    let detailed = aggregate_detailed(events, config);
    (detailed.score, detailed.event_count)
}

pub fn aggregate_detailed(events: &[EngagementEvent], config: &WeightConfig) -> DailyAggregate {
    let mut breakdown = ScoreBreakdown::default();

    for event in events {
        let count = breakdown
            .events_by_type
            .entry(event.event_type.clone())
            .or_insert(0);
        *count = count.saturating_add(1);
    }

    let limit = config.max_events_per_type();
    for (event_type, count) in &breakdown.events_by_type {
        match config.weight(event_type) {
            Some(weight) => {
                let counted = limit.map_or(*count, |limit| (*count).min(limit));
                let points = u64::from(counted) * u64::from(weight);
                breakdown.points_by_type.insert(event_type.clone(), points);
                breakdown.raw_score = breakdown.raw_score.saturating_add(points);
            }
            None => breakdown.unknown_event_types.push(event_type.clone()),
        }
    }

    let cap = config.max_weight_per_day();
    let score = breakdown.raw_score.min(u64::from(cap)) as u32;
    let event_count = u32::try_from(events.len()).unwrap_or(u32::MAX);

    DailyAggregate {
        score,
        event_count,
        momentum_state: classify(score, config),
        breakdown,
    }
}

/// Band a capped score against the snapshot's thresholds, expressed as percentages of the cap.
pub fn classify(score: u32, config: &WeightConfig) -> MomentumState {
    let scaled = u64::from(score) * 100;
    let cap = u64::from(config.max_weight_per_day());
    if scaled >= u64::from(config.rising_threshold_pct()) * cap {
        MomentumState::Rising
    } else if scaled < u64::from(config.needs_care_threshold_pct()) * cap {
        MomentumState::NeedsCare
    } else {
        MomentumState::Steady
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn config() -> WeightConfig {
        WeightConfig::new(
            "test",
            [
                ("chat_message", 2),
                ("biometric_sync", 1),
                ("action_step_complete", 3),
            ],
            10,
        )
        .expect("valid weights")
    }

    fn events(types: &[&str]) -> Vec<EngagementEvent> {
        types
            .iter()
            .enumerate()
            .map(|(offset, event_type)| {
                let at = Utc
                    .with_ymd_and_hms(2025, 3, 14, 9, offset as u32 % 60, 0)
                    .single()
                    .expect("valid timestamp");
                EngagementEvent::new("user-1", *event_type, at)
            })
            .collect()
    }

    fn scenario_one() -> Vec<EngagementEvent> {
        events(&[
            "chat_message",
            "chat_message",
            "chat_message",
            "biometric_sync",
            "action_step_complete",
        ])
    }

    #[test]
    fn mixed_events_sum_to_the_cap() {
        assert_eq!(aggregate(&scenario_one(), &config()), (10, 5));
    }

    #[test]
    fn raw_sum_above_cap_is_clamped() {
        let input = events(&["action_step_complete"; 10]);
        let detailed = aggregate_detailed(&input, &config());
        assert_eq!((detailed.score, detailed.event_count), (10, 10));
        assert_eq!(detailed.breakdown.raw_score, 30);
        assert_eq!(
            detailed.breakdown.points_by_type.get("action_step_complete"),
            Some(&30)
        );
    }

    #[test]
    fn per_type_limit_stops_repeated_events_from_scoring() {
        let input = events(&["lesson_completion"; 10]);
        let detailed = aggregate_detailed(&input, &WeightConfig::product_default());

        assert_eq!((detailed.score, detailed.event_count), (75, 10));
        assert_eq!(detailed.breakdown.raw_score, 75);
        assert_eq!(
            detailed.breakdown.events_by_type.get("lesson_completion"),
            Some(&10)
        );
        assert_eq!(
            detailed.breakdown.points_by_type.get("lesson_completion"),
            Some(&75)
        );
        assert_eq!(detailed.momentum_state, MomentumState::Rising);
    }

    #[test]
    fn per_type_limit_leaves_other_types_alone() {
        let config = config().with_event_limit(2).expect("valid limit");
        let mut input = events(&["action_step_complete"; 4]);
        input.extend(events(&["chat_message", "biometric_sync"]));

        let detailed = aggregate_detailed(&input, &config);

        assert_eq!(detailed.breakdown.raw_score, 6 + 2 + 1);
        assert_eq!((detailed.score, detailed.event_count), (9, 6));
    }

    #[test]
    fn empty_day_scores_zero() {
        let detailed = aggregate_detailed(&[], &config());
        assert_eq!((detailed.score, detailed.event_count), (0, 0));
        assert_eq!(detailed.momentum_state, MomentumState::NeedsCare);
        assert_eq!(detailed.breakdown, ScoreBreakdown::default());
    }

    #[test]
    fn unknown_types_count_but_weigh_nothing() {
        let mut input = scenario_one();
        input.extend(events(&["new_feature_ping"]));
        let detailed = aggregate_detailed(&input, &config());
        assert_eq!((detailed.score, detailed.event_count), (10, 6));
        assert_eq!(
            detailed.breakdown.unknown_event_types,
            vec!["new_feature_ping".to_string()]
        );
        assert_eq!(
            detailed.breakdown.events_by_type.get("new_feature_ping"),
            Some(&1)
        );
        assert!(!detailed
            .breakdown
            .points_by_type
            .contains_key("new_feature_ping"));
    }

    #[test]
    fn permutations_do_not_change_the_result() {
        let original = events(&[
            "biometric_sync",
            "chat_message",
            "unknown",
            "action_step_complete",
        ]);
        let expected = aggregate_detailed(&original, &config());

        let mut reversed = original.clone();
        reversed.reverse();
        assert_eq!(aggregate_detailed(&reversed, &config()), expected);

        let mut rotated = original.clone();
        rotated.rotate_left(2);
        assert_eq!(aggregate_detailed(&rotated, &config()), expected);
    }

    #[test]
    fn adding_events_never_lowers_the_score() {
        let config = config();
        let mut input = Vec::new();
        let mut previous = aggregate(&input, &config).0;
        for event_type in [
            "biometric_sync",
            "new_feature_ping",
            "chat_message",
            "action_step_complete",
            "action_step_complete",
            "chat_message",
        ] {
            input.extend(events(&[event_type]));
            let (score, _) = aggregate(&input, &config);
            assert!(score >= previous, "score dropped after {event_type}");
            assert!(score <= config.max_weight_per_day());
            previous = score;
        }
    }

    #[test]
    fn classification_uses_percentage_of_cap() {
        let config = WeightConfig::product_default();
        assert_eq!(classify(100, &config), MomentumState::Rising);
        assert_eq!(classify(70, &config), MomentumState::Rising);
        assert_eq!(classify(69, &config), MomentumState::Steady);
        assert_eq!(classify(45, &config), MomentumState::Steady);
        assert_eq!(classify(44, &config), MomentumState::NeedsCare);
        assert_eq!(classify(0, &config), MomentumState::NeedsCare);
    }
}
