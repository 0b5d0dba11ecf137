use super::{router, AppState};
use crate::assessment::{wait_for_table, FileTableSource};
use crate::cli::ServeArgs;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::telemetry::{self, LogTarget};
use axum_prometheus::PrometheusMetricLayer;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub async fn run(mut args: ServeArgs, table_override: Option<PathBuf>) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(path) = table_override {
        config.table.path = path;
    }

    telemetry::init(&config.telemetry, LogTarget::Stdout)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();

    let source = FileTableSource::new(config.table.path.clone());
    let table = wait_for_table(&source, config.table.retry_policy()).await?;

    let state = AppState::new(
        Arc::new(table),
        Arc::new(prometheus_handle),
        config.relay.store_path.as_deref(),
    );
    let readiness_flag = state.readiness.clone();

    let app = router(state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "paps calculator ready");

    axum::serve(listener, app).await?;
    Ok(())
}
