mod weights;

pub use weights::{FileWeightSource, StaticWeightSource, WeightConfig, WeightSource};

use chrono::NaiveTime;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let storage = StorageConfig {
            weights_path: optional_path("MOMENTUM_WEIGHTS_PATH"),
            database_path: optional_path("MOMENTUM_DATABASE_PATH"),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            workers: positive("MOMENTUM_WORKERS", defaults.workers)?,
            max_attempts: positive("MOMENTUM_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_backoff: Duration::from_millis(parse_or(
                "MOMENTUM_BACKOFF_MS",
                defaults.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                "MOMENTUM_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )?),
            unit_timeout: Duration::from_secs(positive(
                "MOMENTUM_UNIT_TIMEOUT_SECS",
                defaults.unit_timeout.as_secs(),
            )?),
            write_retries: parse_or("MOMENTUM_WRITE_RETRIES", defaults.write_retries)?,
            max_backfill_days: positive("MOMENTUM_MAX_BACKFILL_DAYS", defaults.max_backfill_days)?,
        };

        let schedule = match env::var("MOMENTUM_DAILY_AT") {
            Ok(raw) => ScheduleConfig {
                run_at: NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
                    ConfigError::InvalidSetting {
                        key: "MOMENTUM_DAILY_AT",
                        value: raw.clone(),
                    }
                })?,
            },
            Err(_) => ScheduleConfig::default(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage,
            pipeline,
            schedule,
        })
    }

    /// Resolve the weight snapshot source: a JSON file when configured, otherwise the
    /// built-in product table.
    pub fn weight_source(&self) -> Box<dyn WeightSource> {
        match &self.storage.weights_path {
            Some(path) => Box::new(FileWeightSource::new(path.clone())),
            None => Box::new(StaticWeightSource::new(WeightConfig::product_default())),
        }
    }
}

fn optional_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidSetting { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + fmt::Display,
{
    let value = parse_or(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidSetting {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where weight snapshots and score rows live.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub weights_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

/// Worker pool, retry, and timeout limits shared by every trigger path.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub unit_timeout: Duration,
    pub write_retries: u32,
    pub max_backfill_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            unit_timeout: Duration::from_secs(30),
            write_retries: 5,
            max_backfill_days: 366,
        }
    }
}

/// Time of day (UTC) at which the daily job scores the previous day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub run_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_at: NaiveTime::from_hms_opt(0, 15, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidSetting {
        key: &'static str,
        value: String,
    },
    WeightSource {
        path: PathBuf,
        source: std::io::Error,
    },
    WeightFormat(serde_json::Error),
    MissingDailyCap,
    NoEventWeights,
    NonPositiveWeight {
        event_type: String,
        weight: i64,
    },
    InvalidThresholds {
        rising: u8,
        needs_care: u8,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSetting { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
            ConfigError::WeightSource { path, source } => write!(
                f,
                "unable to read weight configuration from {}: {}",
                path.display(),
                source
            ),
            ConfigError::WeightFormat(err) => {
                write!(f, "weight configuration is not valid JSON: {err}")
            }
            ConfigError::MissingDailyCap => {
                write!(f, "max_weight_per_day must be present and positive")
            }
            ConfigError::NoEventWeights => {
                write!(f, "weight configuration must define at least one event type")
            }
            ConfigError::NonPositiveWeight { event_type, weight } => write!(
                f,
                "weight for event type '{event_type}' must be positive (got {weight})"
            ),
            ConfigError::InvalidThresholds { rising, needs_care } => write!(
                f,
                "momentum thresholds must satisfy needs_care ({needs_care}) <= rising ({rising}) <= 100"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::WeightSource { source, .. } => Some(source),
            ConfigError::WeightFormat(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "MOMENTUM_WEIGHTS_PATH",
            "MOMENTUM_DATABASE_PATH",
            "MOMENTUM_WORKERS",
            "MOMENTUM_MAX_ATTEMPTS",
            "MOMENTUM_BACKOFF_MS",
            "MOMENTUM_MAX_BACKOFF_MS",
            "MOMENTUM_UNIT_TIMEOUT_SECS",
            "MOMENTUM_WRITE_RETRIES",
            "MOMENTUM_MAX_BACKFILL_DAYS",
            "MOMENTUM_DAILY_AT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(
            config.schedule.run_at,
            NaiveTime::from_hms_opt(0, 15, 0).expect("valid time")
        );
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn pipeline_overrides_are_parsed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MOMENTUM_WORKERS", "2");
        env::set_var("MOMENTUM_UNIT_TIMEOUT_SECS", "5");
        env::set_var("MOMENTUM_DAILY_AT", "03:30");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.unit_timeout, Duration::from_secs(5));
        assert_eq!(
            config.schedule.run_at,
            NaiveTime::from_hms_opt(3, 30, 0).expect("valid time")
        );
        reset_env();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MOMENTUM_WORKERS", "0");
        match AppConfig::load() {
            Err(ConfigError::InvalidSetting { key, .. }) => assert_eq!(key, "MOMENTUM_WORKERS"),
            other => panic!("expected invalid setting, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn malformed_daily_time_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MOMENTUM_DAILY_AT", "25:99");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidSetting {
                key: "MOMENTUM_DAILY_AT",
                ..
            })
        ));
        reset_env();
    }
}
