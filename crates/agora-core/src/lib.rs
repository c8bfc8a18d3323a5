//! Orchestration core for Agora.
//!
//! This crate owns the pieces with the correctness burden: the world event
//! bus, the per-world activity tracker, the stream completion controller,
//! and the tool approval coordinator, plus the trait seams ("ports") that
//! the infrastructure layer implements. It depends only on `agora-types` --
//! never on `agora-infra` or any database/IO crate.

pub mod agent;
pub mod approval;
pub mod event;
pub mod repository;
pub mod stream;
pub mod world;
