//! Turn intake endpoint.
//!
//! POST /api/v1/worlds/{world}/agents/{agent}/turns
//!
//! Accepts a user message and kicks off an agent turn in the background.
//! The response only acknowledges intake; the turn's output arrives on the
//! world's event feed. Clients that want the whole turn open the SSE stream
//! first, then post here.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for the turn intake endpoint.
#[derive(Debug, Deserialize)]
pub struct StartTurnRequest {
    /// The user message opening the turn. Absent for a bare continuation.
    pub message: Option<String>,
}

/// POST /api/v1/worlds/:world/agents/:agent/turns - Start an agent turn.
pub async fn start_turn(
    State(state): State<AppState>,
    Path((world_id, agent_id)): Path<(String, String)>,
    Json(body): Json<StartTurnRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let world = state.world(&world_id);
    let runner = world.runner.clone();

    {
        let world_id = world_id.clone();
        let agent_id = agent_id.clone();
        let message = body.message;
        tokio::spawn(async move {
            if let Err(err) = runner
                .run_turn(&world_id, &agent_id, message.as_deref())
                .await
            {
                tracing::error!(%world_id, %agent_id, error = %err, "Turn failed");
            }
        });
    }

    let elapsed = start.elapsed().as_millis() as u64;
    let data = serde_json::json!({
        "status": "accepted",
        "world_id": world_id,
        "agent_id": agent_id,
    });

    let resp = ApiResponse::success(data, request_id, elapsed)
        .with_link(
            "stream",
            &format!("/api/v1/worlds/{world_id}/events/stream"),
        )
        .with_link("events", &format!("/api/v1/worlds/{world_id}/events"));

    Ok(Json(resp))
}
