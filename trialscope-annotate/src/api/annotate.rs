//! Annotation API handlers
//!
//! POST /api/annotate, POST /api/annotate/response

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::{
    annotation::AnnotationRecord,
    error::{ApiError, ApiResult},
    pipeline::TrialReport,
    types::TrialQuery,
    AppState,
};

/// POST /api/annotate request
#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    #[serde(flatten)]
    pub query: TrialQuery,
    /// Restrict the search to these sources; absent or empty means all
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

/// POST /api/annotate/response request
#[derive(Debug, Deserialize)]
pub struct AnnotateResponseRequest {
    pub report: TrialReport,
    /// Raw answer text from the external model
    pub text: String,
}

/// POST /api/annotate
///
/// Runs the full pipeline for one trial and returns the report.
pub async fn annotate_trial(
    State(state): State<AppState>,
    Json(request): Json<AnnotateRequest>,
) -> ApiResult<Json<TrialReport>> {
    let mut query = request.query;
    query.trial_id = query.trial_id.trim().to_uppercase();
    if query.trial_id.is_empty() {
        return Err(ApiError::BadRequest("trial_id must not be empty".to_string()));
    }

    match state.pipeline.run(&query, request.sources.as_deref()).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            tracing::warn!(trial_id = %query.trial_id, error = %e, "Annotation failed");
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// POST /api/annotate/response
///
/// Validates an external model's answer against a previously returned report.
pub async fn annotate_response(
    State(state): State<AppState>,
    Json(request): Json<AnnotateResponseRequest>,
) -> ApiResult<Json<AnnotationRecord>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let annotation = state.pipeline.annotate_response(&request.report, &request.text);

    tracing::info!(
        trial_id = %request.report.nct_id,
        warnings = annotation.warnings.len(),
        "Model response validated"
    );

    Ok(Json(annotation))
}

/// Build annotation routes
pub fn annotate_routes() -> Router<AppState> {
    Router::new()
        .route("/api/annotate", post(annotate_trial))
        .route("/api/annotate/response", post(annotate_response))
}
