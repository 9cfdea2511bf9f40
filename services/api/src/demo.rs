use chrono::{NaiveDate, TimeZone, Utc};
use clap::Args;
use momentum::config::{PipelineConfig, StaticWeightSource, WeightConfig};
use momentum::error::AppError;
use momentum::storage::InMemoryMomentumStore;
use momentum::workflows::momentum::{
    BackfillRequest, EngagementEvent, MomentumService, ScoreView, UserId, UserSelection,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Day the sample events are recorded on (YYYY-MM-DD). Defaults to yesterday (UTC).
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) date: Option<NaiveDate>,
    /// Also show the weight breakdown persisted with each row.
    #[arg(long)]
    pub(crate) breakdown: bool,
}

/// One documented example: a user and the event types they produced that day.
struct Scenario {
    user: &'static str,
    label: &'static str,
    events: Vec<&'static str>,
}

fn scenarios() -> Vec<Scenario> {
    let mixed = vec![
        "chat_message",
        "chat_message",
        "chat_message",
        "biometric_sync",
        "action_step_complete",
    ];
    let mut with_unknown = mixed.clone();
    with_unknown.push("new_feature_ping");

    vec![
        Scenario {
            user: "demo-mixed",
            label: "3x chat, 1x sync, 1x action",
            events: mixed,
        },
        Scenario {
            user: "demo-capped",
            label: "10x action (cap reached)",
            events: vec!["action_step_complete"; 10],
        },
        Scenario {
            user: "demo-quiet",
            label: "no events (zero floor)",
            events: Vec::new(),
        },
        Scenario {
            user: "demo-unknown",
            label: "mixed + unknown event type",
            events: with_unknown,
        },
    ]
}

pub(crate) fn demo_weights() -> WeightConfig {
    WeightConfig::new(
        "demo",
        [
            ("chat_message", 2),
            ("biometric_sync", 1),
            ("action_step_complete", 3),
        ],
        10,
    )
    .unwrap_or_else(|_| WeightConfig::product_default())
}

pub(crate) fn seed(store: &InMemoryMomentumStore, date: NaiveDate) {
    for scenario in scenarios() {
        store.register_user(UserId::from(scenario.user));
        for (offset, event_type) in scenario.events.iter().enumerate() {
            let timestamp = Utc.from_utc_datetime(
                &date
                    .and_hms_opt(8, offset as u32, 0)
                    .unwrap_or_default(),
            );
            store.record_event(EngagementEvent::new(scenario.user, *event_type, timestamp));
        }
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { date, breakdown } = args;
    let today = Utc::now().date_naive();
    let date = date.unwrap_or_else(|| today.pred_opt().unwrap_or(today));

    let store = Arc::new(InMemoryMomentumStore::default());
    seed(&store, date);
    let weights = demo_weights();

    println!("Momentum score demo for {date}");
    println!(
        "Weights {} (cap {}): {}",
        weights.version(),
        weights.max_weight_per_day(),
        weights
            .event_types()
            .map(|event_type| format!("{event_type}={}", weights.weight(event_type).unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let service = MomentumService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(StaticWeightSource::new(weights)),
        PipelineConfig::default(),
    );

    let report = service
        .backfill(BackfillRequest::single_day(UserSelection::All, date))
        .await?;
    println!(
        "\nBatch run: {} succeeded, {} failed",
        report.succeeded, report.failed
    );
    for scenario in scenarios() {
        if let Some(view) = report
            .outcomes
            .iter()
            .find(|view| view.user_id.as_str() == scenario.user)
        {
            render_row(scenario.label, view);
        }
    }

    println!("\nRe-running the first scenario (idempotent recompute)");
    let rerun = service
        .compute_user(UserId::from("demo-mixed"), date)
        .await?;
    render_row("3x chat, 1x sync, 1x action", &rerun.view());

    if breakdown {
        println!("\nStored breakdowns");
        for row in store.score_rows() {
            println!(
                "  - {}: raw {} | by type {:?} | unknown {:?}",
                row.user_id,
                row.breakdown.raw_score,
                row.breakdown.points_by_type,
                row.breakdown.unknown_event_types
            );
        }
    }

    Ok(())
}

fn render_row(label: &str, view: &ScoreView) {
    println!(
        "  - {:<28} score {:>3} | events {:>2} | {:<9} | v{}",
        label,
        view.score,
        view.event_count,
        view.momentum_state.label(),
        view.version
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use momentum::workflows::momentum::ScoreKey;
    use momentum::workflows::momentum::ScoreStore;

    #[tokio::test]
    async fn seeded_scenarios_score_as_documented() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date");
        let store = Arc::new(InMemoryMomentumStore::default());
        seed(&store, date);
        let service = MomentumService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(StaticWeightSource::new(demo_weights())),
            PipelineConfig::default(),
        );

        let report = service
            .backfill(BackfillRequest::single_day(UserSelection::All, date))
            .await
            .expect("demo batch runs");
        assert_eq!(report.succeeded, 4);

        for (user, expected) in [
            ("demo-mixed", (10, 5)),
            ("demo-capped", (10, 10)),
            ("demo-quiet", (0, 0)),
            ("demo-unknown", (10, 6)),
        ] {
            let row = store
                .fetch(&ScoreKey::new(user, date))
                .await
                .expect("fetch")
                .expect("row");
            assert_eq!((row.score, row.event_count), expected, "{user}");
        }
    }
}
