//! Observability setup for Agora.
//!
//! Owns the tracing subscriber bootstrap and the optional OpenTelemetry
//! bridge. Everything else in the workspace just emits `tracing` events.

pub mod tracing_setup;
