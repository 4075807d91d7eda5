//! Weight table API handlers
//!
//! Source weights: GET|PATCH|PUT|DELETE /api/weights/sources
//! Field weights: GET|PATCH|PUT|DELETE /api/weights/fields/:task
//!
//! PATCH merges the given entries, PUT replaces the table, DELETE resets it
//! to the compiled defaults. Every update is broadcast as `WeightsUpdated`.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use trialscope_common::events::SearchEvent;

use crate::{
    error::ApiResult,
    quality::{AnnotationTask, FieldWeightTable, SourceWeightTable, WeightTable},
    AppState,
};

fn announce(state: &AppState, table: &str, action: &str) {
    state.event_bus.emit_lossy(SearchEvent::WeightsUpdated {
        table: table.to_string(),
        action: action.to_string(),
        timestamp: Utc::now(),
    });
}

fn body(table: Arc<WeightTable>) -> Json<WeightTable> {
    Json(table.as_ref().clone())
}

// ============================================================================
// Source weights
// ============================================================================

/// GET /api/weights/sources
pub async fn get_source_weights(State(state): State<AppState>) -> Json<SourceWeightTable> {
    body(state.pipeline.weights().source_weights())
}

/// GET /api/weights/sources/defaults
pub async fn get_default_source_weights(State(state): State<AppState>) -> Json<SourceWeightTable> {
    Json(state.pipeline.weights().default_source_weights())
}

/// PATCH /api/weights/sources
pub async fn patch_source_weights(
    State(state): State<AppState>,
    Json(updates): Json<SourceWeightTable>,
) -> ApiResult<Json<SourceWeightTable>> {
    let table = state.pipeline.weights().set_source_weights(&updates)?;
    announce(&state, "sources", "set");
    Ok(body(table))
}

/// PUT /api/weights/sources
pub async fn put_source_weights(
    State(state): State<AppState>,
    Json(table): Json<SourceWeightTable>,
) -> ApiResult<Json<SourceWeightTable>> {
    let table = state.pipeline.weights().replace_source_weights(table)?;
    announce(&state, "sources", "replace");
    Ok(body(table))
}

/// DELETE /api/weights/sources
pub async fn reset_source_weights(State(state): State<AppState>) -> Json<SourceWeightTable> {
    let table = state.pipeline.weights().reset_source_weights();
    announce(&state, "sources", "reset");
    body(table)
}

// ============================================================================
// Field weights
// ============================================================================

fn parse_task(task: &str) -> ApiResult<AnnotationTask> {
    Ok(task.parse::<AnnotationTask>()?)
}

/// GET /api/weights/fields/:task
pub async fn get_field_weights(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Json<FieldWeightTable>> {
    let task = parse_task(&task)?;
    Ok(body(state.pipeline.weights().field_weights(task)?))
}

/// GET /api/weights/fields/:task/defaults
pub async fn get_default_field_weights(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Json<FieldWeightTable>> {
    let task = parse_task(&task)?;
    Ok(Json(state.pipeline.weights().default_field_weights(task)))
}

/// PATCH /api/weights/fields/:task
pub async fn patch_field_weights(
    State(state): State<AppState>,
    Path(task): Path<String>,
    Json(updates): Json<FieldWeightTable>,
) -> ApiResult<Json<FieldWeightTable>> {
    let task = parse_task(&task)?;
    let table = state.pipeline.weights().set_field_weights(task, &updates)?;
    announce(&state, task.as_str(), "set");
    Ok(body(table))
}

/// PUT /api/weights/fields/:task
pub async fn put_field_weights(
    State(state): State<AppState>,
    Path(task): Path<String>,
    Json(table): Json<FieldWeightTable>,
) -> ApiResult<Json<FieldWeightTable>> {
    let task = parse_task(&task)?;
    let table = state.pipeline.weights().replace_field_weights(task, table)?;
    announce(&state, task.as_str(), "replace");
    Ok(body(table))
}

/// DELETE /api/weights/fields/:task
pub async fn reset_field_weights(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Json<FieldWeightTable>> {
    let task = parse_task(&task)?;
    let table = state.pipeline.weights().reset_field_weights(task)?;
    announce(&state, task.as_str(), "reset");
    Ok(body(table))
}

/// Build weight table routes
pub fn weight_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/weights/sources",
            get(get_source_weights)
                .patch(patch_source_weights)
                .put(put_source_weights)
                .delete(reset_source_weights),
        )
        .route("/api/weights/sources/defaults", get(get_default_source_weights))
        .route(
            "/api/weights/fields/:task",
            get(get_field_weights)
                .patch(patch_field_weights)
                .put(put_field_weights)
                .delete(reset_field_weights),
        )
        .route("/api/weights/fields/:task/defaults", get(get_default_field_weights))
}
