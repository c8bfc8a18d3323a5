//! HTTP request handlers for the REST API.

pub mod approvals;
pub mod events;
pub mod stream;
pub mod turns;
pub mod ws;
