//! trialscope-annotate library interface
//!
//! Multi-source clinical-trial lookup, quality scoring and controlled
//! vocabulary annotation, plus the HTTP surface that exposes them.

pub mod aggregator;
pub mod annotation;
pub mod api;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod quality;
pub mod sources;
pub mod types;

pub use crate::error::{ApiError, ApiResult};
pub use crate::pipeline::{AnnotationPipeline, TrialReport};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use trialscope_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Search, scoring and annotation
    pub pipeline: Arc<AnnotationPipeline>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<AnnotationPipeline>, event_bus: EventBus) -> Self {
        Self {
            pipeline,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::annotate_routes())
        .merge(api::weight_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
