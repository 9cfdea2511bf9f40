use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use super::backfill::{BackfillDriver, BackfillError, BackfillReport, BackfillRequest, UserSelection};
use super::domain::{DailyMomentumScore, ScoreKey, UserId, ValidationError};
use super::pipeline::{MomentumPipeline, UnitError};
use super::reader::{EventStore, UserDirectory};
use super::retry::{CancelHandle, RetryPolicy};
use super::schedule::DailySchedule;
use super::writer::{ScoreStore, StoreError};
use crate::config::{ConfigError, PipelineConfig, WeightConfig, WeightSource};

/// Entry point shared by the HTTP trigger, the CLI, and the daily schedule. Every
/// invocation loads one weight snapshot and threads it through the whole run.
pub struct MomentumService<E, S, U> {
    events: Arc<E>,
    scores: Arc<S>,
    users: Arc<U>,
    weights: Arc<dyn WeightSource>,
    settings: PipelineConfig,
    cancel: CancelHandle,
}

impl<E, S, U> MomentumService<E, S, U>
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    pub fn new(
        events: Arc<E>,
        scores: Arc<S>,
        users: Arc<U>,
        weights: Arc<dyn WeightSource>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            events,
            scores,
            users,
            weights,
            settings,
            cancel: CancelHandle::default(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    fn snapshot(&self) -> Result<Arc<WeightConfig>, ConfigError> {
        self.weights.load().map(Arc::new)
    }

    fn pipeline(&self, config: Arc<WeightConfig>) -> MomentumPipeline<E, S> {
        MomentumPipeline::new(
            Arc::clone(&self.events),
            Arc::clone(&self.scores),
            config,
            self.settings.write_retries,
        )
    }

    fn driver(&self, config: Arc<WeightConfig>) -> BackfillDriver<E, S, U> {
        BackfillDriver::new(
            self.pipeline(config),
            Arc::clone(&self.users),
            &self.settings,
            self.cancel.clone(),
        )
    }

    /// Score one user for one day, retrying transient failures.
    pub async fn compute_user(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<DailyMomentumScore, ServiceError> {
        let pipeline = self.pipeline(self.snapshot()?);
        let (attempts, result) = pipeline
            .run_with_retry(
                ScoreKey::new(user_id, date),
                &RetryPolicy::from_config(&self.settings),
                self.settings.unit_timeout,
                &self.cancel,
            )
            .await;
        let row = result?;
        info!(
            user_id = %row.user_id,
            date = %row.date,
            score = row.score,
            version = row.version,
            attempts,
            "momentum score computed"
        );
        Ok(row)
    }

    /// Score every active user for one day.
    pub async fn compute_all(&self, date: NaiveDate) -> Result<BackfillReport, ServiceError> {
        self.backfill(BackfillRequest::single_day(UserSelection::All, date))
            .await
    }

    pub async fn backfill(&self, request: BackfillRequest) -> Result<BackfillReport, ServiceError> {
        let driver = self.driver(self.snapshot()?);
        Ok(driver.run(request).await?)
    }

    /// The scheduled trigger: previous UTC day, all active users.
    pub async fn run_daily(&self, now: DateTime<Utc>) -> Result<BackfillReport, ServiceError> {
        self.backfill(DailySchedule::request_for(now)).await
    }

    pub async fn score(&self, key: &ScoreKey) -> Result<Option<DailyMomentumScore>, ServiceError> {
        Ok(self.scores.fetch(key).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Backfill(#[from] BackfillError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_)
            | ServiceError::Backfill(BackfillError::Validation(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
