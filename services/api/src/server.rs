use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState, MomentumBackend, MomentumStore};
use crate::routes::with_momentum_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use momentum::config::AppConfig;
use momentum::error::AppError;
use momentum::telemetry;
use momentum::workflows::momentum::{spawn_daily, CancelHandle, DailySchedule};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    match MomentumBackend::open(&config.storage)? {
        MomentumBackend::Memory(store) => serve(store, config, !args.no_schedule).await,
        MomentumBackend::Sqlite(store) => serve(store, config, !args.no_schedule).await,
    }
}

async fn serve<St: MomentumStore>(
    store: Arc<St>,
    config: AppConfig,
    schedule_enabled: bool,
) -> Result<(), AppError> {
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = Arc::new(build_service(store, &config));
    let cancel = service.cancel_handle();

    let daily = if schedule_enabled {
        let schedule = DailySchedule::new(config.schedule.run_at);
        Some(spawn_daily(service.clone(), schedule, cancel.clone()))
    } else {
        info!("daily scheduler disabled");
        None
    };

    let app = with_momentum_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "momentum score service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    if let Some(task) = daily {
        if let Err(err) = task.await {
            warn!(error = %err, "daily scheduler task ended abnormally");
        }
    }
    info!("momentum score service stopped");
    Ok(())
}

/// Resolves on Ctrl-C and flags every running batch to stop dispatching new units.
async fn shutdown_signal(cancel: CancelHandle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested; cancelling in-flight runs");
    cancel.cancel();
}
