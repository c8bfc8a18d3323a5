//! World event bus.
//!
//! Provides an `EventBus` that validates, records, and synchronously routes
//! `WorldEvent`s to topic, global, and per-agent subscribers, keeping a
//! bounded history with per-kind counters.

pub mod bus;
pub mod subscription;

pub use bus::{DEFAULT_HISTORY_CAPACITY, EventBus};
pub use subscription::Subscription;
