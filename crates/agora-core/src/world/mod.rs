//! Per-world activity state.
//!
//! Tracks in-flight response-producing operations and publishes the
//! `response-start`/`idle` transition events that bound an activity turn.

pub mod activity;

pub use activity::ActivityTracker;
