use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::{ConfigError, PipelineConfig, StaticWeightSource, WeightConfig, WeightSource};
use crate::storage::InMemoryMomentumStore;
use crate::workflows::momentum::{
    EngagementEvent, EventFetchError, EventStore, MomentumService, UserDirectory, UserId,
};

pub(super) fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date")
}

pub(super) fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("valid time"))
}

/// `chat_message=2, biometric_sync=1, action_step_complete=3`, cap 10.
pub(super) fn scenario_weights() -> WeightConfig {
    WeightConfig::new(
        "v-test",
        [
            ("chat_message", 2),
            ("biometric_sync", 1),
            ("action_step_complete", 3),
        ],
        10,
    )
    .expect("valid weights")
}

/// Fast limits so retry and timeout paths finish quickly.
pub(super) fn settings() -> PipelineConfig {
    PipelineConfig {
        workers: 4,
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        unit_timeout: Duration::from_secs(5),
        write_retries: 5,
        max_backfill_days: 31,
    }
}

/// 3x chat, 1x sync, 1x action on `date`.
pub(super) fn seed_scenario_one(store: &InMemoryMomentumStore, user: &str, date: NaiveDate) {
    for hour in [8, 9, 10] {
        store.record_event(EngagementEvent::new(user, "chat_message", at(date, hour)));
    }
    store.record_event(EngagementEvent::new(user, "biometric_sync", at(date, 11)));
    store.record_event(EngagementEvent::new(
        user,
        "action_step_complete",
        at(date, 12),
    ));
}

pub(super) type MemoryService =
    MomentumService<InMemoryMomentumStore, InMemoryMomentumStore, InMemoryMomentumStore>;

pub(super) fn build_service() -> (MemoryService, Arc<InMemoryMomentumStore>) {
    let store = Arc::new(InMemoryMomentumStore::default());
    let service = MomentumService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(StaticWeightSource::new(scenario_weights())),
        settings(),
    );
    (service, store)
}

/// Weight source whose snapshot cannot be loaded.
pub(super) struct BrokenWeights;

impl WeightSource for BrokenWeights {
    fn load(&self) -> Result<WeightConfig, ConfigError> {
        Err(ConfigError::MissingDailyCap)
    }
}

/// Delegates to a memory store but fails reads for selected users, optionally only for the
/// first `transient_failures` calls.
pub(super) struct FlakyEvents {
    pub(super) inner: InMemoryMomentumStore,
    pub(super) failing_users: BTreeSet<UserId>,
    pub(super) transient_failures: Option<u32>,
    pub(super) calls: AtomicU32,
}

impl FlakyEvents {
    pub(super) fn failing(inner: InMemoryMomentumStore, users: &[&str]) -> Self {
        Self {
            inner,
            failing_users: users.iter().map(|user| UserId::from(*user)).collect(),
            transient_failures: None,
            calls: AtomicU32::new(0),
        }
    }

    pub(super) fn transient(inner: InMemoryMomentumStore, user: &str, failures: u32) -> Self {
        Self {
            transient_failures: Some(failures),
            ..Self::failing(inner, &[user])
        }
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for FlakyEvents {
    async fn events_in_range(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, EventFetchError> {
        if self.failing_users.contains(user_id) {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst);
            let failing = match self.transient_failures {
                Some(limit) => seen < limit,
                None => true,
            };
            if failing {
                return Err(EventFetchError::Unavailable("replica lagging".to_string()));
            }
        }
        self.inner.events_in_range(user_id, start, end).await
    }
}

/// Never answers for `user`, so every attempt hits the unit timeout.
pub(super) struct StalledEvents {
    pub(super) inner: InMemoryMomentumStore,
    pub(super) user: UserId,
}

#[async_trait]
impl EventStore for StalledEvents {
    async fn events_in_range(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, EventFetchError> {
        if user_id == &self.user {
            std::future::pending::<()>().await;
        }
        self.inner.events_in_range(user_id, start, end).await
    }
}

pub(super) struct UnavailableDirectory;

#[async_trait]
impl UserDirectory for UnavailableDirectory {
    async fn active_users(&self) -> Result<Vec<UserId>, EventFetchError> {
        Err(EventFetchError::Unavailable("directory offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
