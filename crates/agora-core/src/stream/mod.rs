//! Outward stream lifecycle.
//!
//! Decides when a live response channel has nothing left to deliver, with
//! timeout fallbacks for streams that go silent or never reach idle.

pub mod completion;

pub use completion::{CloseReason, StreamCloser, StreamItem, WorldStream};
