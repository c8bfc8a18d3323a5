//! ToolExecutor trait definition.
//!
//! The executor actually runs a tool call and reports its outcome. The
//! approval coordinator and turn runner only ever talk to this trait; the
//! process-spawning implementation lives in agora-infra.

use agora_types::error::ToolExecutionError;
use agora_types::tool::{ToolCall, ToolOutcome};

/// Trait for tool execution backends.
///
/// Implementations must be safe to call concurrently: the turn runner fires
/// direct calls inline while the approval coordinator resolves held ones.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ToolExecutor: Send + Sync {
    /// Run one tool call to completion.
    ///
    /// A tool that ran but failed (non-zero exit) is still `Ok`; the outcome
    /// carries the exit code. `Err` means the call never produced an outcome
    /// (unknown tool, spawn failure, timeout).
    fn execute(
        &self,
        call: &ToolCall,
    ) -> impl std::future::Future<Output = Result<ToolOutcome, ToolExecutionError>> + Send;
}
