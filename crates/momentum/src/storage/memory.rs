use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::workflows::momentum::{
    DailyMomentumScore, EngagementEvent, EventFetchError, EventStore, ScoreKey, ScoreStore,
    ScoreWrite, StoreError, UserDirectory, UserId,
};

/// Process-local event and score store used by the demo, tests, and servers started
/// without a database path.
#[derive(Default, Clone)]
pub struct InMemoryMomentumStore {
    events: Arc<Mutex<Vec<EngagementEvent>>>,
    users: Arc<Mutex<BTreeSet<UserId>>>,
    scores: Arc<Mutex<BTreeMap<ScoreKey, DailyMomentumScore>>>,
}

impl InMemoryMomentumStore {
    /// Record an event and mark its user active.
    pub fn record_event(&self, event: EngagementEvent) {
        self.register_user(event.user_id.clone());
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn register_user(&self, user_id: UserId) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
    }

    /// Snapshot of every stored row ordered by (user, date).
    pub fn score_rows(&self) -> Vec<DailyMomentumScore> {
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryMomentumStore {
    async fn events_in_range(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, EventFetchError> {
        let guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .iter()
            .filter(|event| {
                &event.user_id == user_id && event.timestamp >= start && event.timestamp < end
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryMomentumStore {
    async fn active_users(&self) -> Result<Vec<UserId>, EventFetchError> {
        let guard = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.iter().cloned().collect())
    }
}

#[async_trait]
impl ScoreStore for InMemoryMomentumStore {
    async fn fetch(&self, key: &ScoreKey) -> Result<Option<DailyMomentumScore>, StoreError> {
        let guard = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    async fn upsert(
        &self,
        write: &ScoreWrite,
        expected_version: Option<u64>,
    ) -> Result<DailyMomentumScore, StoreError> {
        let mut guard = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        let actual = guard.get(&write.key).map(|row| row.version);
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                key: write.key.clone(),
                expected: expected_version,
                actual,
            });
        }

        let row = write.clone().into_row(actual.map_or(1, |version| version + 1));
        guard.insert(write.key.clone(), row.clone());
        Ok(row)
    }
}
