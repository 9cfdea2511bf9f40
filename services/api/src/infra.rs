use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use momentum::config::{AppConfig, StorageConfig};
use momentum::storage::{InMemoryMomentumStore, SqliteMomentumStore};
use momentum::workflows::momentum::{
    parse_iso_date, EventStore, MomentumService, ScoreStore, StoreError, UserDirectory,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// A store that serves events, active users, and score rows at once.
pub(crate) trait MomentumStore: EventStore + ScoreStore + UserDirectory + 'static {}

impl<T> MomentumStore for T where T: EventStore + ScoreStore + UserDirectory + 'static {}

pub(crate) type StoreService<St> = MomentumService<St, St, St>;

/// Persistence selected from `MOMENTUM_DATABASE_PATH`.
pub(crate) enum MomentumBackend {
    Memory(Arc<InMemoryMomentumStore>),
    Sqlite(Arc<SqliteMomentumStore>),
}

impl MomentumBackend {
    pub(crate) fn open(storage: &StorageConfig) -> Result<Self, StoreError> {
        match &storage.database_path {
            Some(path) => {
                info!(path = %path.display(), "using sqlite momentum store");
                Ok(Self::Sqlite(Arc::new(SqliteMomentumStore::open(path)?)))
            }
            None => {
                info!("MOMENTUM_DATABASE_PATH unset; using in-memory momentum store");
                Ok(Self::Memory(Arc::new(InMemoryMomentumStore::default())))
            }
        }
    }
}

pub(crate) fn build_service<St: MomentumStore>(
    store: Arc<St>,
    config: &AppConfig,
) -> StoreService<St> {
    MomentumService::new(
        store.clone(),
        store.clone(),
        store,
        Arc::from(config.weight_source()),
        config.pipeline.clone(),
    )
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    parse_iso_date(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_reports_the_offending_value() {
        assert_eq!(
            parse_date("2025-03-14"),
            Ok(NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date"))
        );
        let err = parse_date("tomorrow").expect_err("rejected");
        assert!(err.contains("tomorrow"));
    }

    #[test]
    fn backend_follows_database_path() {
        let memory = MomentumBackend::open(&StorageConfig::default()).expect("memory opens");
        assert!(matches!(memory, MomentumBackend::Memory(_)));

        let dir = tempfile::tempdir().expect("temp dir");
        let storage = StorageConfig {
            weights_path: None,
            database_path: Some(dir.path().join("scores.db")),
        };
        let sqlite = MomentumBackend::open(&storage).expect("sqlite opens");
        assert!(matches!(sqlite, MomentumBackend::Sqlite(_)));
    }
}
