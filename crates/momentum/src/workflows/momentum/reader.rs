use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tracing::debug;

use super::domain::{EngagementEvent, UserId};

/// Range-filtered read access to committed engagement events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events for `user_id` with `start <= timestamp < end`.
    async fn events_in_range(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, EventFetchError>;
}

/// Source of the "all active users" set used by batch triggers.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn active_users(&self) -> Result<Vec<UserId>, EventFetchError>;
}

/// Transient read failure; callers may retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventFetchError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("event query failed: {0}")]
    Query(String),
}

/// Half-open UTC window `[date 00:00, date+1 00:00)`.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = date
        .checked_add_days(Days::new(1))
        .map(|next| next.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    (start, end)
}

/// Fetches one user's events for one UTC calendar day.
pub struct EventReader<E> {
    store: Arc<E>,
}

impl<E> Clone for EventReader<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<E> EventReader<E>
where
    E: EventStore + 'static,
{
    pub fn new(store: Arc<E>) -> Self {
        Self { store }
    }

    pub async fn fetch(
        &self,
        user_id: &UserId,
        date: NaiveDate,
    ) -> Result<Vec<EngagementEvent>, EventFetchError> {
        let (start, end) = day_bounds(date);
        let mut events = self.store.events_in_range(user_id, start, end).await?;

        let returned = events.len();
        events.retain(|event| {
            &event.user_id == user_id && event.timestamp >= start && event.timestamp < end
        });
        if events.len() != returned {
            debug!(
                user_id = %user_id,
                %date,
                dropped = returned - events.len(),
                "event store returned rows outside the requested day"
            );
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct LeakyStore {
        events: Vec<EngagementEvent>,
    }

    #[async_trait]
    impl EventStore for LeakyStore {
        async fn events_in_range(
            &self,
            _user_id: &UserId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<EngagementEvent>, EventFetchError> {
            Ok(self.events.clone())
        }
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, minute, second)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn day_bounds_cover_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date");
        let (start, end) = day_bounds(date);
        assert_eq!(start, at(14, 0, 0, 0));
        assert_eq!(end, at(15, 0, 0, 0));
    }

    #[tokio::test]
    async fn fetch_keeps_only_the_requested_user_and_day() {
        let user = UserId::from("user-1");
        let store = Arc::new(LeakyStore {
            events: vec![
                EngagementEvent::new("user-1", "chat_message", at(13, 23, 59, 59)),
                EngagementEvent::new("user-1", "chat_message", at(14, 0, 0, 0)),
                EngagementEvent::new("user-1", "biometric_sync", at(14, 23, 59, 59)),
                EngagementEvent::new("user-1", "chat_message", at(15, 0, 0, 0)),
                EngagementEvent::new("user-2", "chat_message", at(14, 12, 0, 0)),
            ],
        });
        let reader = EventReader::new(store);

        let events = reader
            .fetch(&user, NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date"))
            .await
            .expect("fetch succeeds");

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.user_id == user));
    }
}
