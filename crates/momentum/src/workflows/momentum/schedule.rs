use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::backfill::{BackfillRequest, UserSelection};
use super::reader::{EventStore, UserDirectory};
use super::retry::CancelHandle;
use super::service::MomentumService;
use super::writer::ScoreStore;

/// Once-a-day trigger that scores the previous UTC day for every active user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    run_at: NaiveTime,
}

impl DailySchedule {
    pub fn new(run_at: NaiveTime) -> Self {
        Self { run_at }
    }

    /// First firing strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.run_at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// The day a firing at `now` is responsible for.
    pub fn target_date(now: DateTime<Utc>) -> NaiveDate {
        let today = now.date_naive();
        today.pred_opt().unwrap_or(today)
    }

    /// The same request object the manual and backfill paths dispatch.
    pub fn request_for(now: DateTime<Utc>) -> BackfillRequest {
        BackfillRequest::single_day(UserSelection::All, Self::target_date(now))
    }
}

/// Run the daily job in the background until `cancel` is set. A firing already under way
/// stops dispatching new units and returns its partial report before the task exits.
pub fn spawn_daily<E, S, U>(
    service: Arc<MomentumService<E, S, U>>,
    schedule: DailySchedule,
    cancel: CancelHandle,
) -> JoinHandle<()>
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = schedule.next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "daily momentum job scheduled");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("daily momentum job stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match service.run_daily(Utc::now()).await {
                Ok(report) => info!(
                    date = %report.start,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "daily momentum job finished"
                ),
                Err(err) => error!(error = %err, "daily momentum job failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn next_run_is_today_when_time_not_reached() {
        let schedule = DailySchedule::new(NaiveTime::from_hms_opt(0, 15, 0).expect("valid"));
        assert_eq!(schedule.next_run_after(at(14, 0, 5)), at(14, 0, 15));
    }

    #[test]
    fn next_run_rolls_to_tomorrow_once_passed() {
        let schedule = DailySchedule::new(NaiveTime::from_hms_opt(0, 15, 0).expect("valid"));
        assert_eq!(schedule.next_run_after(at(14, 0, 15)), at(15, 0, 15));
        assert_eq!(schedule.next_run_after(at(14, 18, 0)), at(15, 0, 15));
    }

    #[test]
    fn firing_targets_the_previous_utc_day() {
        let request = DailySchedule::request_for(at(1, 0, 15));
        let expected = NaiveDate::from_ymd_opt(2025, 2, 28).expect("valid date");
        assert_eq!(request.start, expected);
        assert_eq!(request.end, expected);
        assert_eq!(request.users, UserSelection::All);
        assert!(!request.dry_run);
    }
}
