use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AnalysisRequest, PoiCriterion};
use super::error::ErrorKind;
use super::orchestrator::SuitabilityAnalysis;
use super::reclass::{IntervalPreview, ValueDomain};

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalPreviewRequest {
    pub criterion: PoiCriterion,
    #[serde(default)]
    pub classes: Option<u32>,
    /// Known raster value range; rasters fall back to the default range.
    #[serde(default)]
    pub domain: Option<ValueDomain>,
}

pub fn analysis_router(service: Arc<SuitabilityAnalysis>) -> Router {
    Router::new()
        .route("/api/v1/analysis", post(analysis_handler))
        .route("/api/v1/intervals/preview", post(preview_handler))
        .with_state(service)
}

/// HTTP status for a failed analysis.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation
        | ErrorKind::UnrecognizedDataType
        | ErrorKind::MissingAssociatedFile => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ExternalToolFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) async fn analysis_handler(
    State(service): State<Arc<SuitabilityAnalysis>>,
    Json(request): Json<AnalysisRequest>,
) -> Response {
    match service.run(request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(failure) => {
            let kind = failure.error.kind();
            let payload = json!({
                "error": failure.to_string(),
                "kind": kind,
                "phase": failure.phase,
                "phases": failure.phases,
            });
            (status_for(kind), Json(payload)).into_response()
        }
    }
}

pub(crate) async fn preview_handler(
    State(service): State<Arc<SuitabilityAnalysis>>,
    Json(request): Json<IntervalPreviewRequest>,
) -> Response {
    let criterion = request.criterion.normalized();
    match IntervalPreview::build(&criterion, service.config(), request.classes, request.domain) {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
    }
}
