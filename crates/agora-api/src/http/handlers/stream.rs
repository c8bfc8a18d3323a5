//! SSE endpoint for live world events.
//!
//! GET /api/v1/worlds/{world}/events/stream
//!
//! Opens a completion-controlled subscription to the world topic and
//! forwards events until the stream decides the response is finished:
//! matched idle plus the grace drain, or a timeout fallback.
//!
//! SSE event types:
//! - `event` -- one world event as JSON
//! - `done` -- stream complete: `{ "reason": "idle-complete" }`

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::Stream;

use agora_core::stream::{StreamItem, WorldStream};

use crate::http::error::AppError;
use crate::state::AppState;

/// GET /api/v1/worlds/:world/events/stream - SSE event stream.
///
/// The subscription is registered before the response starts, so a turn
/// kicked off right after the request cannot race past the stream. Client
/// disconnects drop the stream, which releases the subscription.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let world = state.world(&world_id);
    let mut stream = WorldStream::open(&world.bus, &world_id, &state.config.stream);

    let sse_stream = async_stream::stream! {
        loop {
            match stream.next().await {
                Some(StreamItem::Event(event)) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        yield Ok::<_, Infallible>(Event::default().event("event").data(json));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to serialize world event");
                    }
                },
                Some(StreamItem::Closed(reason)) => {
                    let data = serde_json::json!({ "reason": reason });
                    yield Ok(Event::default().event("done").data(data.to_string()));
                    break;
                }
                None => break,
            }
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
