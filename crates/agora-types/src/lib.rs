//! Shared domain types for Agora.
//!
//! This crate contains the types that cross crate boundaries: the world event
//! envelope and its payload variants, tool calls and approval decisions,
//! conversation memory messages, runtime configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod tool;
