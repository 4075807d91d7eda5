//! Server-Sent Events for search progress

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use trialscope_common::sse::create_event_sse_stream;

/// GET /events
///
/// Streams SearchStarted, SourceDispatched, SourceCompleted,
/// SearchCompleted and WeightsUpdated events.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_event_sse_stream("trialscope", &state.event_bus)
}
