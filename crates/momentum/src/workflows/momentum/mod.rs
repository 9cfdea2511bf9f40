//! Daily momentum scoring: read one user's events for one UTC day, fold them into a capped
//! score under a versioned weight snapshot, and persist the result idempotently. The same
//! unit of work backs the manual trigger, the daily schedule, and historical backfills.

pub mod aggregate;
pub mod backfill;
pub mod domain;
pub mod pipeline;
pub mod reader;
pub mod retry;
pub mod router;
pub mod schedule;
pub mod service;
pub mod writer;

#[cfg(test)]
mod tests;

pub use aggregate::{aggregate, aggregate_detailed, classify, DailyAggregate, ScoreBreakdown};
pub use backfill::{
    BackfillDriver, BackfillError, BackfillMode, BackfillReport, BackfillRequest, UnitFailure,
    UserSelection,
};
pub use domain::{
    parse_iso_date, DailyMomentumScore, EngagementEvent, MomentumState, ScoreKey, ScoreView,
    UserId, ValidationError,
};
pub use pipeline::{MomentumPipeline, ScoreUnit, UnitError, UnitState};
pub use reader::{day_bounds, EventFetchError, EventReader, EventStore, UserDirectory};
pub use retry::{CancelHandle, RetryPolicy};
pub use router::momentum_router;
pub use schedule::{spawn_daily, DailySchedule};
pub use service::{MomentumService, ServiceError};
pub use writer::{
    IdempotentWriter, ScoreStore, ScoreWrite, StoreError, WriteConflictError, WriteError,
};
