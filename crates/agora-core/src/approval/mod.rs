//! Human-in-the-loop tool approval.
//!
//! Policy decides which calls are gated; the coordinator owns the open
//! approval registry and the decision round-trip.

pub mod coordinator;
pub mod policy;

pub use coordinator::{ApprovalCoordinator, PendingApproval, Resolution, ResumeRequest};
pub use policy::{ApprovalPolicy, RequireAll, RequireNamed};
