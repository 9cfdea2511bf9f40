//! Fan a date range x user set out into independent units on a bounded worker pool.

mod report;

pub use report::{BackfillReport, UnitFailure};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::domain::{DailyMomentumScore, ScoreKey, UserId, ValidationError};
use super::pipeline::{MomentumPipeline, UnitError};
use super::reader::{EventFetchError, EventStore, UserDirectory};
use super::retry::{CancelHandle, RetryPolicy};
use super::writer::ScoreStore;
use crate::config::PipelineConfig;

/// Which users a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSelection {
    All,
    Listed(Vec<UserId>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    /// Recompute every unit, overwriting existing rows.
    #[default]
    Recompute,
    /// Only compute units that have no row yet.
    MissingOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub users: UserSelection,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub mode: BackfillMode,
    pub dry_run: bool,
}

impl BackfillRequest {
    pub fn new(users: UserSelection, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            users,
            start,
            end,
            mode: BackfillMode::Recompute,
            dry_run: false,
        }
    }

    pub fn single_day(users: UserSelection, date: NaiveDate) -> Self {
        Self::new(users, date, date)
    }

    pub fn with_mode(mut self, mode: BackfillMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn dates(&self, max_days: u32) -> Result<Vec<NaiveDate>, ValidationError> {
        if self.start > self.end {
            return Err(ValidationError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }
        let days = (self.end - self.start).num_days() + 1;
        if days > i64::from(max_days) {
            return Err(ValidationError::RangeTooLong {
                days,
                limit: max_days,
            });
        }
        Ok(self.start.iter_days().take(days as usize).collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unable to list active users: {0}")]
    Users(#[source] EventFetchError),
}

enum UnitOutcome {
    Written(DailyMomentumScore),
    Skipped,
    WouldProcess,
    Failed { error: UnitError, attempts: u32 },
}

/// Everything a spawned unit needs, cloned per task.
struct UnitJob<E, S> {
    pipeline: MomentumPipeline<E, S>,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancelHandle,
    mode: BackfillMode,
    dry_run: bool,
}

impl<E, S> Clone for UnitJob<E, S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            retry: self.retry,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
            mode: self.mode,
            dry_run: self.dry_run,
        }
    }
}

impl<E, S> UnitJob<E, S>
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
{
    async fn execute(&self, key: &ScoreKey) -> UnitOutcome {
        if self.mode == BackfillMode::MissingOnly {
            match self.pipeline.scores().exists(key).await {
                Ok(true) => return UnitOutcome::Skipped,
                Ok(false) => {}
                Err(err) => {
                    return UnitOutcome::Failed {
                        error: UnitError::Lookup(err),
                        attempts: 1,
                    }
                }
            }
        }
        if self.dry_run {
            return UnitOutcome::WouldProcess;
        }

        match self
            .pipeline
            .run_with_retry(key.clone(), &self.retry, self.timeout, &self.cancel)
            .await
        {
            (_, Ok(row)) => UnitOutcome::Written(row),
            (attempts, Err(error)) => UnitOutcome::Failed { error, attempts },
        }
    }
}

/// Dispatches every (user, date) unit of a request and collects a partial-failure summary.
pub struct BackfillDriver<E, S, U> {
    pipeline: MomentumPipeline<E, S>,
    users: Arc<U>,
    retry: RetryPolicy,
    workers: usize,
    unit_timeout: Duration,
    max_days: u32,
    cancel: CancelHandle,
}

impl<E, S, U> BackfillDriver<E, S, U>
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    pub fn new(
        pipeline: MomentumPipeline<E, S>,
        users: Arc<U>,
        settings: &PipelineConfig,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            pipeline,
            users,
            retry: RetryPolicy::from_config(settings),
            workers: settings.workers.max(1),
            unit_timeout: settings.unit_timeout,
            max_days: settings.max_backfill_days,
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(&self, request: BackfillRequest) -> Result<BackfillReport, BackfillError> {
        let dates = request.dates(self.max_days)?;
        let users: BTreeSet<UserId> = match &request.users {
            UserSelection::All => self
                .users
                .active_users()
                .await
                .map_err(BackfillError::Users)?
                .into_iter()
                .collect(),
            UserSelection::Listed(listed) => listed.iter().cloned().collect(),
        };

        let config_version = self.pipeline.config().version().to_string();
        let mut report = BackfillReport::new(&request, &config_version, users.len() * dates.len());
        info!(
            start = %request.start,
            end = %request.end,
            users = users.len(),
            units = report.total,
            mode = ?request.mode,
            dry_run = request.dry_run,
            %config_version,
            "backfill started"
        );

        let job = UnitJob {
            pipeline: self.pipeline.clone(),
            retry: self.retry,
            timeout: self.unit_timeout,
            cancel: self.cancel.clone(),
            mode: request.mode,
            dry_run: request.dry_run,
        };
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut in_flight = BTreeSet::new();

        for date in &dates {
            for user in &users {
                if self.cancel.is_cancelled() {
                    report.cancelled += 1;
                    continue;
                }
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    report.cancelled += 1;
                    continue;
                };
                if self.cancel.is_cancelled() {
                    report.cancelled += 1;
                    continue;
                }

                let key = ScoreKey::new(user.clone(), *date);
                in_flight.insert(key.clone());
                let job = job.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = job.execute(&key).await;
                    (key, outcome)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    in_flight.remove(&key);
                    record(&mut report, &key, outcome);
                }
                Err(err) => error!(error = %err, "backfill worker task aborted"),
            }
        }
        for key in in_flight {
            report.failed += 1;
            report
                .failures
                .push(UnitFailure::new(&key, "worker task aborted", 0));
        }

        report.finalize();
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            would_process = report.would_process,
            "backfill finished"
        );
        Ok(report)
    }
}

fn record(report: &mut BackfillReport, key: &ScoreKey, outcome: UnitOutcome) {
    match outcome {
        UnitOutcome::Written(row) => {
            report.succeeded += 1;
            report.outcomes.push(row.view());
        }
        UnitOutcome::Skipped => report.skipped += 1,
        UnitOutcome::WouldProcess => report.would_process += 1,
        UnitOutcome::Failed {
            error: UnitError::Cancelled,
            ..
        } => report.cancelled += 1,
        UnitOutcome::Failed { error, attempts } => {
            report.failed += 1;
            report
                .failures
                .push(UnitFailure::new(key, error, attempts));
        }
    }
}
