use crate::cli::ServeArgs;
use crate::infra::{
    settings_from_config, AppState, InMemoryCommitteeStore, InMemoryStaffDirectory,
    RecordingNotifier,
};
use crate::routes::build_router;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use hireboard::config::AppConfig;
use hireboard::error::AppError;
use hireboard::telemetry;
use hireboard::workflows::committee::{
    CommitteeService, NotificationRouter, NotificationRules, TemplateCatalog,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryCommitteeStore::default());
    let directory = Arc::new(InMemoryStaffDirectory::seeded());
    let notifier = Arc::new(RecordingNotifier::default());
    let notification_router = NotificationRouter::new(
        directory,
        notifier,
        NotificationRules::standard(),
    );
    let service = Arc::new(CommitteeService::new(
        store.clone(),
        notification_router,
        settings_from_config(&config.committee),
    ));
    let catalog = Arc::new(TemplateCatalog::new(store));

    let app = build_router(service, catalog)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "committee feedback service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
