//! HTTP/REST API layer for Agora.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, CORS
//! support, and realtime event delivery over SSE and WebSocket.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
