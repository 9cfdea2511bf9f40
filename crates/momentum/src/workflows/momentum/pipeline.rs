use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::aggregate::aggregate_detailed;
use super::domain::{DailyMomentumScore, ScoreKey};
use super::reader::{EventFetchError, EventReader, EventStore};
use super::retry::{CancelHandle, RetryPolicy};
use super::writer::{IdempotentWriter, ScoreStore, ScoreWrite, StoreError, WriteError};
use crate::config::WeightConfig;

/// Lifecycle of one (user, date) unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Reading,
    Aggregating,
    Writing,
    Done,
    Failed,
}

/// The unit of work shared by the scheduled, manual, and backfill triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreUnit {
    pub key: ScoreKey,
    state: UnitState,
}

impl ScoreUnit {
    pub fn new(key: ScoreKey) -> Self {
        Self {
            key,
            state: UnitState::Pending,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    fn transition(&mut self, next: UnitState) {
        debug!(key = %self.key, from = ?self.state, to = ?next, "unit transition");
        self.state = next;
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UnitError {
    #[error("failed to read events: {0}")]
    Fetch(#[from] EventFetchError),
    #[error("failed to persist score: {0}")]
    Write(#[from] WriteError),
    #[error("failed to look up existing score: {0}")]
    Lookup(StoreError),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("run cancelled before the unit completed")]
    Cancelled,
}

impl UnitError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UnitError::Cancelled)
    }
}

/// Reader -> aggregator -> writer over one weight snapshot.
pub struct MomentumPipeline<E, S> {
    reader: EventReader<E>,
    writer: IdempotentWriter<S>,
    config: Arc<WeightConfig>,
}

impl<E, S> Clone for MomentumPipeline<E, S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            writer: self.writer.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E, S> MomentumPipeline<E, S>
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
{
    pub fn new(
        events: Arc<E>,
        scores: Arc<S>,
        config: Arc<WeightConfig>,
        write_retries: u32,
    ) -> Self {
        Self {
            reader: EventReader::new(events),
            writer: IdempotentWriter::new(scores, write_retries),
            config,
        }
    }

    pub fn config(&self) -> &Arc<WeightConfig> {
        &self.config
    }

    pub fn scores(&self) -> &Arc<S> {
        self.writer.store()
    }

    /// One full Reading -> Aggregating -> Writing pass.
    pub async fn run(&self, unit: &mut ScoreUnit) -> Result<DailyMomentumScore, UnitError> {
        unit.transition(UnitState::Reading);
        let events = match self.reader.fetch(&unit.key.user_id, unit.key.date).await {
            Ok(events) => events,
            Err(err) => {
                unit.transition(UnitState::Failed);
                return Err(err.into());
            }
        };

        unit.transition(UnitState::Aggregating);
        let aggregate = aggregate_detailed(&events, &self.config);
        if !aggregate.breakdown.unknown_event_types.is_empty() {
            warn!(
                key = %unit.key,
                unknown = ?aggregate.breakdown.unknown_event_types,
                config_version = self.config.version(),
                "event types missing from weight configuration scored as zero"
            );
        }

        unit.transition(UnitState::Writing);
        let write = ScoreWrite::from_aggregate(
            unit.key.clone(),
            &aggregate,
            self.config.version(),
            Utc::now(),
        );
        match self.writer.write(write).await {
            Ok(row) => {
                unit.transition(UnitState::Done);
                Ok(row)
            }
            Err(err) => {
                unit.transition(UnitState::Failed);
                Err(err.into())
            }
        }
    }

    /// Run a unit under `policy`, re-running the whole chain on every attempt and bounding
    /// each attempt by `timeout`. Returns the attempt count alongside the outcome.
    pub async fn run_with_retry(
        &self,
        key: ScoreKey,
        policy: &RetryPolicy,
        timeout: Duration,
        cancel: &CancelHandle,
    ) -> (u32, Result<DailyMomentumScore, UnitError>) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut unit = ScoreUnit::new(key.clone());

            let err = match tokio::time::timeout(timeout, self.run(&mut unit)).await {
                Ok(Ok(row)) => return (attempt, Ok(row)),
                Ok(Err(err)) => err,
                Err(_) => UnitError::Timeout(timeout),
            };

            if attempt >= policy.max_attempts || !err.is_retryable() {
                error!(key = %key, attempts = attempt, error = %err, "unit failed permanently");
                return (attempt, Err(err));
            }
            if cancel.is_cancelled() {
                return (attempt, Err(UnitError::Cancelled));
            }

            let delay = policy.delay_after(attempt);
            warn!(key = %key, attempt, ?delay, error = %err, "unit failed; retrying");
            tokio::time::sleep(delay).await;

            if cancel.is_cancelled() {
                return (attempt, Err(UnitError::Cancelled));
            }
        }
    }
}
