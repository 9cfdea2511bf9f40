//! One-shot CLI triggers. Each loads configuration, opens the configured store, runs one
//! invocation through the same service the HTTP routes use, and prints JSON to stdout.

use crate::infra::{build_service, parse_date, MomentumBackend, MomentumStore};
use chrono::{NaiveDate, Utc};
use clap::Args;
use momentum::config::AppConfig;
use momentum::error::AppError;
use momentum::telemetry;
use momentum::workflows::momentum::router::BatchResponse;
use momentum::workflows::momentum::{
    BackfillMode, BackfillReport, BackfillRequest, ServiceError, UserId, UserSelection,
    ValidationError,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct ComputeArgs {
    /// Score only this user; omit to score every active user
    #[arg(long)]
    pub(crate) user_id: Option<String>,
    /// Day to score (YYYY-MM-DD). Defaults to the current UTC day.
    #[arg(long, value_parser = parse_date)]
    pub(crate) date: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct BackfillArgs {
    /// First day of the range (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub(crate) start: NaiveDate,
    /// Last day of the range (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub(crate) end: NaiveDate,
    /// Restrict the run to these users (repeatable); defaults to every active user
    #[arg(long)]
    pub(crate) user_id: Vec<String>,
    /// Only compute days that have no stored score yet
    #[arg(long)]
    pub(crate) missing_only: bool,
    /// Report what would run without writing anything
    #[arg(long)]
    pub(crate) dry_run: bool,
}

impl BackfillArgs {
    pub(crate) fn into_request(self) -> Result<BackfillRequest, ValidationError> {
        let users = if self.user_id.is_empty() {
            UserSelection::All
        } else {
            UserSelection::Listed(
                self.user_id
                    .iter()
                    .map(|raw| UserId::parse(raw))
                    .collect::<Result<_, _>>()?,
            )
        };
        let mode = if self.missing_only {
            BackfillMode::MissingOnly
        } else {
            BackfillMode::Recompute
        };
        Ok(BackfillRequest::new(users, self.start, self.end)
            .with_mode(mode)
            .dry_run(self.dry_run))
    }
}

fn prepare() -> Result<(AppConfig, MomentumBackend), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let backend = MomentumBackend::open(&config.storage)?;
    Ok((config, backend))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Non-zero exit when any unit failed or was left undone.
fn ensure_clean(report: &BackfillReport) -> Result<(), AppError> {
    if report.is_clean() {
        Ok(())
    } else {
        Err(AppError::Incomplete {
            failed: report.failed,
            cancelled: report.cancelled,
        })
    }
}

pub(crate) async fn run_compute(args: ComputeArgs) -> Result<(), AppError> {
    let (config, backend) = prepare()?;
    match backend {
        MomentumBackend::Memory(store) => compute_with(store, &config, args).await,
        MomentumBackend::Sqlite(store) => compute_with(store, &config, args).await,
    }
}

async fn compute_with<St: MomentumStore>(
    store: Arc<St>,
    config: &AppConfig,
    args: ComputeArgs,
) -> Result<(), AppError> {
    let service = build_service(store, config);
    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());

    match args.user_id {
        Some(raw) => {
            let user_id = UserId::parse(&raw).map_err(ServiceError::from)?;
            let row = service.compute_user(user_id, date).await?;
            print_json(&row.view())
        }
        None => {
            let report = service.compute_all(date).await?;
            let clean = ensure_clean(&report);
            print_json(&BatchResponse::from(report))?;
            clean
        }
    }
}

pub(crate) async fn run_backfill(args: BackfillArgs) -> Result<(), AppError> {
    let (config, backend) = prepare()?;
    match backend {
        MomentumBackend::Memory(store) => backfill_with(store, &config, args).await,
        MomentumBackend::Sqlite(store) => backfill_with(store, &config, args).await,
    }
}

async fn backfill_with<St: MomentumStore>(
    store: Arc<St>,
    config: &AppConfig,
    args: BackfillArgs,
) -> Result<(), AppError> {
    let service = build_service(store, config);
    let request = args
        .into_request()
        .map_err(ServiceError::from)?;
    let report = service.backfill(request).await?;
    print_json(&report)?;
    ensure_clean(&report)
}

pub(crate) async fn run_daily() -> Result<(), AppError> {
    let (config, backend) = prepare()?;
    match backend {
        MomentumBackend::Memory(store) => daily_with(store, &config).await,
        MomentumBackend::Sqlite(store) => daily_with(store, &config).await,
    }
}

async fn daily_with<St: MomentumStore>(store: Arc<St>, config: &AppConfig) -> Result<(), AppError> {
    let service = build_service(store, config);
    let report = service.run_daily(Utc::now()).await?;
    print_json(&report)?;
    ensure_clean(&report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(user_id: Vec<&str>, missing_only: bool) -> BackfillArgs {
        BackfillArgs {
            start: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
            end: NaiveDate::from_ymd_opt(2025, 3, 7).expect("valid date"),
            user_id: user_id.into_iter().map(str::to_string).collect(),
            missing_only,
            dry_run: false,
        }
    }

    #[test]
    fn empty_user_list_means_every_active_user() {
        let request = args(Vec::new(), false).into_request().expect("valid");
        assert_eq!(request.users, UserSelection::All);
        assert_eq!(request.mode, BackfillMode::Recompute);
    }

    #[test]
    fn listed_users_and_mode_are_carried_over() {
        let request = args(vec!["user-a"], true).into_request().expect("valid");
        assert_eq!(
            request.users,
            UserSelection::Listed(vec![UserId::from("user-a")])
        );
        assert_eq!(request.mode, BackfillMode::MissingOnly);
    }

    #[test]
    fn blank_user_ids_are_rejected() {
        assert_eq!(
            args(vec!["  "], false).into_request(),
            Err(ValidationError::BlankUserId)
        );
    }
}
