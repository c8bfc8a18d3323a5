//! World event history and bus statistics endpoints.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use agora_types::event::{BusStats, EventFilter, EventKind, WorldEvent};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for the event history endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct EventHistoryQuery {
    /// Comma-separated event types to keep.
    pub types: Option<String>,
    /// Only events attributed to this agent.
    pub agent_id: Option<String>,
    /// Only events at or after this RFC 3339 timestamp.
    pub since: Option<String>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

/// GET /api/v1/worlds/:world/events - Recorded history, oldest first.
pub async fn get_events(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
    Query(query): Query<EventHistoryQuery>,
) -> Result<Json<ApiResponse<Vec<WorldEvent>>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let kinds = match &query.types {
        Some(types) => {
            let mut kinds = Vec::new();
            for raw in types.split(',').filter(|s| !s.trim().is_empty()) {
                kinds.push(raw.trim().parse::<EventKind>()?);
            }
            Some(kinds)
        }
        None => None,
    };

    let since = match &query.since {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| AppError::Validation(format!("Invalid since timestamp: {e}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let filter = EventFilter {
        kinds,
        agent_id: query.agent_id.clone(),
        since,
        limit: query.limit,
    };

    let world = state.world(&world_id);
    let events = world.bus.history(Some(&filter));
    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(events, request_id, elapsed)
        .with_link("self", &format!("/api/v1/worlds/{world_id}/events"))
        .with_link(
            "stream",
            &format!("/api/v1/worlds/{world_id}/events/stream"),
        );

    Ok(Json(resp))
}

/// GET /api/v1/worlds/:world/stats - Bus counters for one world.
pub async fn get_stats(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
) -> Result<Json<ApiResponse<BusStats>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let world = state.world(&world_id);
    let stats = world.bus.stats();
    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(stats, request_id, elapsed)
        .with_link("self", &format!("/api/v1/worlds/{world_id}/stats"))
        .with_link("events", &format!("/api/v1/worlds/{world_id}/events"));

    Ok(Json(resp))
}
