use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryPropertyStore, LoggingCreditObserver, UnconfiguredExtractionGateway,
};
use crate::routes::with_import_routes;
use appraisal_import::config::AppConfig;
use appraisal_import::error::AppError;
use appraisal_import::telemetry;
use appraisal_import::workflows::import::{
    ExtractionGateway, HttpExtractionGateway, ImportPipeline, ImportScreens,
};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
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

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let gateway: Arc<dyn ExtractionGateway> = match &config.import.extraction_endpoint {
        Some(endpoint) => Arc::new(HttpExtractionGateway::new(endpoint.clone())),
        None => {
            warn!("IMPORT_EXTRACTION_ENDPOINT not set, extractions will fail");
            Arc::new(UnconfiguredExtractionGateway)
        }
    };
    let pipeline = ImportPipeline::new(
        gateway,
        Arc::new(InMemoryPropertyStore::default()),
        Arc::new(config.import.credential_policy()),
        config.import.controller_settings(),
    )
    .with_credit_observer(Arc::new(LoggingCreditObserver::default()));
    let screens = Arc::new(ImportScreens::new(Arc::new(pipeline)));

    let app = with_import_routes(screens)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        lookup_policy = ?config.import.lookup_failure_policy,
        "property import service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
