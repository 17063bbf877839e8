use metrics_exporter_prometheus::PrometheusHandle;
use site_suitability::config::AppConfig;
use site_suitability::error::AppError;
use site_suitability::geoprocessing::ProcessToolExecutor;
use site_suitability::workflows::suitability::SuitabilityAnalysis;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Pipeline wired to the configured engine command.
pub(crate) fn build_analysis(config: &AppConfig) -> Result<Arc<SuitabilityAnalysis>, AppError> {
    let executor = ProcessToolExecutor::from_config(&config.engine)?;
    info!(
        program = executor.program(),
        scratch = %config.scratch.directory.display(),
        "geoprocessing engine configured"
    );
    Ok(Arc::new(SuitabilityAnalysis::new(
        Arc::new(executor),
        config.analysis.clone(),
        config.scratch.clone(),
    )))
}
