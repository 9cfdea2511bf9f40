use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::aggregate::{DailyAggregate, ScoreBreakdown};
use super::domain::{DailyMomentumScore, MomentumState, ScoreKey};

/// Fully computed row contents, minus the version the store assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreWrite {
    pub key: ScoreKey,
    pub score: u32,
    pub event_count: u32,
    pub computed_at: DateTime<Utc>,
    pub config_version: String,
    pub momentum_state: MomentumState,
    pub breakdown: ScoreBreakdown,
}

impl ScoreWrite {
    pub fn from_aggregate(
        key: ScoreKey,
        aggregate: &DailyAggregate,
        config_version: &str,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            score: aggregate.score,
            event_count: aggregate.event_count,
            computed_at,
            config_version: config_version.to_string(),
            momentum_state: aggregate.momentum_state,
            breakdown: aggregate.breakdown.clone(),
        }
    }

    /// Materialize the row a store should hold after applying this write at `version`.
    pub fn into_row(self, version: u64) -> DailyMomentumScore {
        DailyMomentumScore {
            user_id: self.key.user_id,
            date: self.key.date,
            score: self.score,
            event_count: self.event_count,
            computed_at: self.computed_at,
            version,
            config_version: self.config_version,
            momentum_state: self.momentum_state,
            breakdown: self.breakdown,
        }
    }
}

/// Persistence for score rows with an atomic, version-guarded upsert.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn fetch(&self, key: &ScoreKey) -> Result<Option<DailyMomentumScore>, StoreError>;

    /// Insert when `expected_version` is `None` and no row exists; otherwise replace the row
    /// only if its version equals `expected_version`, bumping it by one. Anything else is a
    /// [`StoreError::VersionConflict`] and leaves the row untouched.
    async fn upsert(
        &self,
        write: &ScoreWrite,
        expected_version: Option<u64>,
    ) -> Result<DailyMomentumScore, StoreError>;

    async fn exists(&self, key: &ScoreKey) -> Result<bool, StoreError> {
        Ok(self.fetch(key).await?.is_some())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("stale write for {key}: expected version {expected:?}, found {actual:?}")]
    VersionConflict {
        key: ScoreKey,
        expected: Option<u64>,
        actual: Option<u64>,
    },
    #[error("score store unavailable: {0}")]
    Unavailable(String),
}

/// Optimistic retries ran out while other writers kept moving the row.
#[derive(Debug, Clone, thiserror::Error)]
#[error("write for {key} still conflicted after {attempts} attempts")]
pub struct WriteConflictError {
    pub key: ScoreKey,
    pub attempts: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Conflict(#[from] WriteConflictError),
    #[error(transparent)]
    Store(StoreError),
}

/// Upserts aggregation results so that repeated or racing invocations converge on one row.
pub struct IdempotentWriter<S> {
    store: Arc<S>,
    max_conflict_retries: u32,
}

impl<S> Clone for IdempotentWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

impl<S> IdempotentWriter<S>
where
    S: ScoreStore + 'static,
{
    pub fn new(store: Arc<S>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn write(&self, write: ScoreWrite) -> Result<DailyMomentumScore, WriteError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let expected = self
                .store
                .fetch(&write.key)
                .await
                .map_err(WriteError::Store)?
                .map(|row| row.version);

            match self.store.upsert(&write, expected).await {
                Ok(row) => {
                    debug!(key = %write.key, version = row.version, attempts, "score row written");
                    return Ok(row);
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    if attempts > self.max_conflict_retries {
                        return Err(WriteConflictError {
                            key: write.key.clone(),
                            attempts,
                        }
                        .into());
                    }
                    warn!(
                        key = %write.key,
                        ?expected,
                        ?actual,
                        attempts,
                        "concurrent score write detected; re-reading"
                    );
                    tokio::task::yield_now().await;
                }
                Err(other) => return Err(WriteError::Store(other)),
            }
        }
    }
}
