use chrono::NaiveDate;
use serde::Serialize;

use super::BackfillRequest;
use crate::workflows::momentum::domain::{ScoreKey, ScoreView, UserId};

/// A unit that ended in `Failed` after exhausting its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub error: String,
    pub attempts: u32,
}

impl UnitFailure {
    pub fn new(key: &ScoreKey, error: impl ToString, attempts: u32) -> Self {
        Self {
            user_id: key.user_id.clone(),
            date: key.date,
            error: error.to_string(),
            attempts,
        }
    }
}

/// Structured summary of a batch. Counters always add up to `total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub config_version: String,
    pub dry_run: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub would_process: usize,
    pub outcomes: Vec<ScoreView>,
    pub failures: Vec<UnitFailure>,
}

impl BackfillReport {
    pub(crate) fn new(request: &BackfillRequest, config_version: &str, total: usize) -> Self {
        Self {
            start: request.start,
            end: request.end,
            config_version: config_version.to_string(),
            dry_run: request.dry_run,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            would_process: 0,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// No unit failed and nothing was left undone by cancellation.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Order output deterministically regardless of completion order.
    pub(crate) fn finalize(&mut self) {
        self.outcomes
            .sort_by(|a, b| (&a.user_id, a.date).cmp(&(&b.user_id, b.date)));
        self.failures
            .sort_by(|a, b| (&a.user_id, a.date).cmp(&(&b.user_id, b.date)));
    }
}
