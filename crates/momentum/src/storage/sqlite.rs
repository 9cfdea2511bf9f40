//! SQLite-backed event and score persistence.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::sync::Mutex;

use crate::workflows::momentum::{
    DailyMomentumScore, EngagementEvent, EventFetchError, EventStore, MomentumState, ScoreKey,
    ScoreStore, ScoreWrite, StoreError, UserDirectory, UserId,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS engagement_events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         TEXT NOT NULL,
    event_type      TEXT NOT NULL,
    event_ts_us     INTEGER NOT NULL,
    event_timestamp TEXT NOT NULL,
    metadata        TEXT
);
CREATE INDEX IF NOT EXISTS idx_engagement_events_user_ts
    ON engagement_events (user_id, event_ts_us);

CREATE TABLE IF NOT EXISTS active_users (
    user_id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS daily_momentum_scores (
    user_id        TEXT NOT NULL,
    score_date     TEXT NOT NULL,
    score          INTEGER NOT NULL,
    event_count    INTEGER NOT NULL,
    computed_at    TEXT NOT NULL,
    version        INTEGER NOT NULL,
    config_version TEXT NOT NULL,
    momentum_state TEXT NOT NULL,
    breakdown      TEXT NOT NULL,
    PRIMARY KEY (user_id, score_date)
);
"#;

/// Event store, user directory, and score store over one SQLite database.
#[derive(Clone)]
pub struct SqliteMomentumStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMomentumStore {
    /// Open or create the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            }
        }

        let conn = Connection::open(db_path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(unavailable)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append an event and mark its user active.
    pub async fn record_event(&self, event: &EngagementEvent) -> Result<(), StoreError> {
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(unavailable)?;
        tx.execute(
            r#"INSERT INTO engagement_events
               (user_id, event_type, event_ts_us, event_timestamp, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                event.user_id.as_str(),
                event.event_type,
                event.timestamp.timestamp_micros(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                metadata,
            ],
        )
        .map_err(unavailable)?;
        tx.execute(
            "INSERT OR IGNORE INTO active_users (user_id) VALUES (?1)",
            [event.user_id.as_str()],
        )
        .map_err(unavailable)?;
        tx.commit().map_err(unavailable)
    }

    pub async fn register_user(&self, user_id: &UserId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO active_users (user_id) VALUES (?1)",
            [user_id.as_str()],
        )
        .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

struct RawScoreRow {
    user_id: String,
    score_date: String,
    score: i64,
    event_count: i64,
    computed_at: String,
    version: i64,
    config_version: String,
    momentum_state: String,
    breakdown: String,
}

impl RawScoreRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            score_date: row.get(1)?,
            score: row.get(2)?,
            event_count: row.get(3)?,
            computed_at: row.get(4)?,
            version: row.get(5)?,
            config_version: row.get(6)?,
            momentum_state: row.get(7)?,
            breakdown: row.get(8)?,
        })
    }

    fn into_score(self) -> Result<DailyMomentumScore, StoreError> {
        let corrupt = |field: &str| {
            StoreError::Unavailable(format!(
                "corrupt score row for {}@{}: bad {field}",
                self.user_id, self.score_date
            ))
        };

        Ok(DailyMomentumScore {
            date: NaiveDate::parse_from_str(&self.score_date, "%Y-%m-%d")
                .map_err(|_| corrupt("score_date"))?,
            score: u32::try_from(self.score).map_err(|_| corrupt("score"))?,
            event_count: u32::try_from(self.event_count).map_err(|_| corrupt("event_count"))?,
            computed_at: DateTime::parse_from_rfc3339(&self.computed_at)
                .map_err(|_| corrupt("computed_at"))?
                .with_timezone(&Utc),
            version: u64::try_from(self.version).map_err(|_| corrupt("version"))?,
            momentum_state: MomentumState::parse(&self.momentum_state)
                .ok_or_else(|| corrupt("momentum_state"))?,
            breakdown: serde_json::from_str(&self.breakdown).map_err(|_| corrupt("breakdown"))?,
            config_version: self.config_version.clone(),
            user_id: UserId(self.user_id.clone()),
        })
    }
}

const SELECT_SCORE: &str = r#"SELECT user_id, score_date, score, event_count, computed_at,
                                     version, config_version, momentum_state, breakdown
                              FROM daily_momentum_scores
                              WHERE user_id = ?1 AND score_date = ?2"#;

fn load_score(conn: &Connection, key: &ScoreKey) -> Result<Option<DailyMomentumScore>, StoreError> {
    conn.query_row(
        SELECT_SCORE,
        params![key.user_id.as_str(), key.date.to_string()],
        RawScoreRow::from_row,
    )
    .optional()
    .map_err(unavailable)?
    .map(RawScoreRow::into_score)
    .transpose()
}

#[async_trait]
impl EventStore for SqliteMomentumStore {
    async fn events_in_range(
        &self,
        user_id: &UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, EventFetchError> {
        let query_error = |err: rusqlite::Error| EventFetchError::Query(err.to_string());

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                r#"SELECT event_type, event_timestamp, metadata
                   FROM engagement_events
                   WHERE user_id = ?1 AND event_ts_us >= ?2 AND event_ts_us < ?3
                   ORDER BY event_ts_us, id"#,
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(
                params![
                    user_id.as_str(),
                    start.timestamp_micros(),
                    end.timestamp_micros()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .map_err(query_error)?;

        let mut events = Vec::new();
        for row in rows {
            let (event_type, timestamp, metadata) = row.map_err(query_error)?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|err| EventFetchError::Query(format!("bad event timestamp: {err}")))?
                .with_timezone(&Utc);
            let metadata = metadata
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|err| EventFetchError::Query(format!("bad event metadata: {err}")))?;
            events.push(EngagementEvent {
                user_id: user_id.clone(),
                event_type,
                timestamp,
                metadata,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl UserDirectory for SqliteMomentumStore {
    async fn active_users(&self) -> Result<Vec<UserId>, EventFetchError> {
        let query_error = |err: rusqlite::Error| EventFetchError::Unavailable(err.to_string());

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT user_id FROM active_users ORDER BY user_id")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_error)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(UserId(row.map_err(query_error)?));
        }
        Ok(users)
    }
}

#[async_trait]
impl ScoreStore for SqliteMomentumStore {
    async fn fetch(&self, key: &ScoreKey) -> Result<Option<DailyMomentumScore>, StoreError> {
        let conn = self.conn.lock().await;
        load_score(&conn, key)
    }

    async fn upsert(
        &self,
        write: &ScoreWrite,
        expected_version: Option<u64>,
    ) -> Result<DailyMomentumScore, StoreError> {
        let breakdown = serde_json::to_string(&write.breakdown)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let date = write.key.date.to_string();
        let computed_at = write
            .computed_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;

        let changed = match expected_version {
            None => tx.execute(
                r#"INSERT INTO daily_momentum_scores
                   (user_id, score_date, score, event_count, computed_at, version,
                    config_version, momentum_state, breakdown)
                   VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)
                   ON CONFLICT (user_id, score_date) DO NOTHING"#,
                params![
                    write.key.user_id.as_str(),
                    date,
                    write.score,
                    write.event_count,
                    computed_at,
                    write.config_version,
                    write.momentum_state.label(),
                    breakdown,
                ],
            ),
            Some(expected) => tx.execute(
                r#"UPDATE daily_momentum_scores
                   SET score = ?3, event_count = ?4, computed_at = ?5,
                       version = version + 1, config_version = ?6,
                       momentum_state = ?7, breakdown = ?8
                   WHERE user_id = ?1 AND score_date = ?2 AND version = ?9"#,
                params![
                    write.key.user_id.as_str(),
                    date,
                    write.score,
                    write.event_count,
                    computed_at,
                    write.config_version,
                    write.momentum_state.label(),
                    breakdown,
                    i64::try_from(expected).unwrap_or(i64::MAX),
                ],
            ),
        }
        .map_err(unavailable)?;

        let current = load_score(&tx, &write.key)?;
        if changed == 0 {
            return Err(StoreError::VersionConflict {
                key: write.key.clone(),
                expected: expected_version,
                actual: current.map(|row| row.version),
            });
        }
        tx.commit().map_err(unavailable)?;

        current.ok_or_else(|| {
            StoreError::Unavailable(format!("score row for {} vanished after write", write.key))
        })
    }

    async fn exists(&self, key: &ScoreKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT 1 FROM daily_momentum_scores WHERE user_id = ?1 AND score_date = ?2",
            params![key.user_id.as_str(), key.date.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(unavailable)
    }
}
