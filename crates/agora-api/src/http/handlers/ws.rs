//! WebSocket handler for realtime world events and bidirectional commands.
//!
//! The `/worlds/{world}/ws` endpoint upgrades an HTTP connection to a
//! WebSocket. Once connected, the handler:
//!
//! - **Forwards events:** Subscribes to the world's topic on the bus and
//!   pushes every event to the client as a JSON text frame.
//! - **Receives commands:** Parses incoming text frames as [`WsCommand`]
//!   and routes approval decisions to the world's coordinator.
//!
//! The bridge channel drops events for a client that cannot keep up rather
//! than blocking publishers; the client catches up with the next events.
//!
//! Disconnecting a WebSocket does **not** cancel running turns. In-flight
//! work keeps publishing to the bus and history, so a client can reconnect
//! and pick up where it left off.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use agora_types::tool::ApprovalDecision;

use crate::state::{AppState, WorldCoordinator};

/// Incoming command from a WebSocket client.
///
/// Clients send JSON-encoded text frames matching one of these variants.
/// Unknown or malformed messages are logged and ignored.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Resolve an open approval request.
    ApprovalDecision {
        #[serde(flatten)]
        decision: ApprovalDecision,
    },
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Upgrade an HTTP request to a WebSocket connection for one world.
///
/// This is mounted at `/worlds/{world}/ws` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(world_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, world_id))
}

/// Core WebSocket connection handler.
///
/// Uses `tokio::select!` to multiplex between the world's event feed and
/// incoming WebSocket messages from the client. This keeps both sender and
/// receiver in a single task, enabling bidirectional communication
/// (responding to `Ping`, acting on decisions).
async fn handle_ws_connection(socket: WebSocket, state: AppState, world_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let world = state.world(&world_id);
    // Holding the subscription keeps the bridge alive; dropping it on return
    // unsubscribes from the bus.
    let (_subscription, mut events) = world.bus.subscribe_channel(&world_id);

    loop {
        tokio::select! {
            // --- Branch 1: Forward world events to the WebSocket client ---
            event = events.recv() => {
                match event {
                    Some(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    // Client disconnected
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("Failed to serialize world event: {err}");
                            }
                        }
                    }
                    None => {
                        // Bus side went away (world torn down)
                        break;
                    }
                }
            }

            // --- Branch 2: Process commands from the WebSocket client ---
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        process_command(&text, &mut ws_sender, &world.coordinator).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Client disconnected
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Ignore binary, ping, pong protocol frames (handled by axum/tungstenite)
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(%world_id, "WebSocket connection closed");
}

/// Parse and process a single command from the WebSocket client.
async fn process_command(
    text: &str,
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    coordinator: &WorldCoordinator,
) {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(
                raw = %text,
                error = %err,
                "Ignoring malformed WebSocket command"
            );
            return;
        }
    };

    match cmd {
        WsCommand::ApprovalDecision { decision } => {
            let tool_call_id = decision.tool_call_id.clone();
            match coordinator.resolve(decision).await {
                Ok(resolution) => {
                    tracing::info!(
                        %tool_call_id,
                        ?resolution,
                        "Approval resolved via WebSocket"
                    );
                }
                Err(err) => {
                    // Stale and unknown correlations are ignored; the client
                    // learns the outcome from the event feed either way.
                    tracing::warn!(%tool_call_id, error = %err, "Approval decision not applied");
                }
            }
        }
        WsCommand::Ping => {
            let pong = r#"{"type":"pong"}"#;
            if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                tracing::debug!("Failed to send pong (client disconnecting)");
            }
        }
    }
}
