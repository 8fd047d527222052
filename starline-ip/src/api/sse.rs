//! Server-Sent Events for pipeline notifications

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - SSE stream of pipeline events
///
/// Streams a ConnectionStatus event first, then every `PipelineEvent` with its
/// type name as the SSE event field.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    starline_common::sse::create_event_sse_stream("starline-ip", &state.event_bus)
}
