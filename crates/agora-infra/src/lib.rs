//! Infrastructure layer for Agora.
//!
//! Contains implementations of the trait seams defined in `agora-core`:
//! SQLite-backed agent memory, process-spawning tool execution, and the
//! config loader.

pub mod config;
pub mod sqlite;
pub mod tool;
