use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::backfill::{BackfillMode, BackfillReport, BackfillRequest, UnitFailure, UserSelection};
use super::domain::{parse_iso_date, ScoreKey, ScoreView, UserId, ValidationError};
use super::reader::{EventStore, UserDirectory};
use super::service::{MomentumService, ServiceError};
use super::writer::ScoreStore;

/// Router builder exposing the manual compute trigger, backfills, and score lookups.
pub fn momentum_router<E, S, U>(service: Arc<MomentumService<E, S, U>>) -> Router
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    Router::new()
        .route("/api/v1/momentum/compute", post(compute_handler::<E, S, U>))
        .route("/api/v1/momentum/backfill", post(backfill_handler::<E, S, U>))
        .route(
            "/api/v1/momentum/scores/:user_id/:date",
            get(score_handler::<E, S, U>),
        )
        .with_state(service)
}

/// Body of the compute trigger. An empty body means every active user, today.
#[derive(Debug, Default, Deserialize)]
pub struct ComputeRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub date_override: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackfillBody {
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub mode: BackfillMode,
    #[serde(default)]
    pub dry_run: bool,
}

impl BackfillBody {
    fn into_request(self) -> Result<BackfillRequest, ValidationError> {
        let users = match self.user_ids {
            Some(ids) => UserSelection::Listed(
                ids.iter()
                    .map(|raw| UserId::parse(raw))
                    .collect::<Result<_, _>>()?,
            ),
            None => UserSelection::All,
        };
        Ok(BackfillRequest::new(
            users,
            parse_iso_date(&self.start_date)?,
            parse_iso_date(&self.end_date)?,
        )
        .with_mode(self.mode)
        .dry_run(self.dry_run))
    }
}

/// Batch shape returned when the compute trigger covers every active user.
#[derive(Debug, Serialize)]
pub struct BatchResults {
    pub successful: usize,
    pub failed: usize,
    pub details: Vec<ScoreView>,
    pub failures: Vec<UnitFailure>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub date: NaiveDate,
    pub config_version: String,
    pub results: BatchResults,
}

impl From<BackfillReport> for BatchResponse {
    fn from(report: BackfillReport) -> Self {
        Self {
            date: report.start,
            config_version: report.config_version,
            results: BatchResults {
                successful: report.succeeded,
                failed: report.failed,
                details: report.outcomes,
                failures: report.failures,
            },
        }
    }
}

pub(crate) async fn compute_handler<E, S, U>(
    State(service): State<Arc<MomentumService<E, S, U>>>,
    body: Bytes,
) -> Response
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ComputeRequest::default()
    } else {
        match serde_json::from_slice::<ComputeRequest>(&body) {
            Ok(request) => request,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
        }
    };

    let date = match request.date_override.as_deref() {
        Some(raw) => match parse_iso_date(raw) {
            Ok(date) => date,
            Err(err) => return service_error(ServiceError::from(err)),
        },
        None => Utc::now().date_naive(),
    };

    match request.user_id.as_deref() {
        Some(raw) => {
            let user_id = match UserId::parse(raw) {
                Ok(user_id) => user_id,
                Err(err) => return service_error(ServiceError::from(err)),
            };
            match service.compute_user(user_id, date).await {
                Ok(row) => (StatusCode::OK, axum::Json(row.view())).into_response(),
                Err(err) => service_error(err),
            }
        }
        None => match service.compute_all(date).await {
            Ok(report) => {
                (StatusCode::OK, axum::Json(BatchResponse::from(report))).into_response()
            }
            Err(err) => service_error(err),
        },
    }
}

pub(crate) async fn backfill_handler<E, S, U>(
    State(service): State<Arc<MomentumService<E, S, U>>>,
    body: Bytes,
) -> Response
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    let body = match serde_json::from_slice::<BackfillBody>(&body) {
        Ok(body) => body,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let request = match body.into_request() {
        Ok(request) => request,
        Err(err) => return service_error(ServiceError::from(err)),
    };

    match service.backfill(request).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => service_error(err),
    }
}

pub(crate) async fn score_handler<E, S, U>(
    State(service): State<Arc<MomentumService<E, S, U>>>,
    Path((user_id, date)): Path<(String, String)>,
) -> Response
where
    E: EventStore + 'static,
    S: ScoreStore + 'static,
    U: UserDirectory + 'static,
{
    let key = match (UserId::parse(&user_id), parse_iso_date(&date)) {
        (Ok(user_id), Ok(date)) => ScoreKey::new(user_id, date),
        (Err(err), _) | (_, Err(err)) => return service_error(ServiceError::from(err)),
    };

    match service.score(&key).await {
        Ok(Some(row)) => (StatusCode::OK, axum::Json(row)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no score recorded for {key}")),
        Err(err) => service_error(err),
    }
}

fn service_error(err: ServiceError) -> Response {
    error_response(err.status_code(), err.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    let payload = json!({
        "error": message,
    });
    (status, axum::Json(payload)).into_response()
}
