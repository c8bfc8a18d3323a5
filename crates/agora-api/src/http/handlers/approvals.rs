//! Approval inspection and decision endpoints.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use agora_core::approval::{PendingApproval, Resolution};
use agora_types::tool::{ApprovalDecision, ApprovalScope, Decision};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for the decision endpoint. The approval id comes from the
/// path; the rest mirrors the WebSocket decision command.
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// Approve or deny.
    pub decision: Decision,
    /// Lifetime of an approval (`once` unless stated).
    #[serde(default)]
    pub scope: ApprovalScope,
    /// Echo of the tool being decided on.
    pub tool_name: String,
    /// Echo of the call arguments.
    #[serde(default)]
    pub tool_args: serde_json::Value,
    /// Working directory override for the execution.
    #[serde(default)]
    pub working_dir: Option<std::path::PathBuf>,
}

/// GET /api/v1/worlds/:world/approvals - Open approvals for one world.
pub async fn list_approvals(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<PendingApproval>>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let world = state.world(&world_id);
    let approvals: Vec<PendingApproval> = world
        .coordinator
        .open_approvals()
        .into_iter()
        .filter(|p| p.world_id == world_id)
        .collect();
    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(approvals, request_id, elapsed)
        .with_link("self", &format!("/api/v1/worlds/{world_id}/approvals"));

    Ok(Json(resp))
}

/// POST /api/v1/worlds/:world/approvals/:id/decision - Resolve an approval.
///
/// A deny never touches the executor; an approve runs the held call and the
/// results thread back through memory and the event feed. Either way the
/// agent is resumed exactly once, so a repeat decision gets a 409.
pub async fn decide_approval(
    State(state): State<AppState>,
    Path((world_id, approval_id)): Path<(String, String)>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let world = state.world(&world_id);
    let decision = ApprovalDecision {
        tool_call_id: approval_id.clone(),
        decision: body.decision,
        scope: body.scope,
        tool_name: body.tool_name,
        tool_args: body.tool_args,
        working_dir: body.working_dir,
    };

    let resolution = world.coordinator.resolve(decision).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let data = match resolution {
        Resolution::Denied => serde_json::json!({
            "tool_call_id": approval_id,
            "resolution": "denied",
        }),
        Resolution::Executed(outcome) => serde_json::json!({
            "tool_call_id": approval_id,
            "resolution": "executed",
            "outcome": outcome,
        }),
        Resolution::ExecutionFailed(error) => serde_json::json!({
            "tool_call_id": approval_id,
            "resolution": "execution_failed",
            "error": error,
        }),
    };

    let resp = ApiResponse::success(data, request_id, elapsed)
        .with_link("events", &format!("/api/v1/worlds/{world_id}/events"))
        .with_link(
            "approvals",
            &format!("/api/v1/worlds/{world_id}/approvals"),
        );

    Ok(Json(resp))
}
