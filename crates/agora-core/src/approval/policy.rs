//! Approval policy trait definition.
//!
//! Policy answers one question per call: does this tool need a human
//! decision before it runs? Scope bypasses (a persistent grant from an
//! earlier decision) are the coordinator's concern, not the policy's.

use std::collections::HashSet;

use agora_types::tool::ToolCall;

/// Decides which tool calls are gated behind approval.
pub trait ApprovalPolicy: Send + Sync {
    fn requires_approval(&self, call: &ToolCall) -> bool;
}

/// Gates every call. The safe default for worlds running side-effecting
/// tools.
#[derive(Debug, Default)]
pub struct RequireAll;

impl ApprovalPolicy for RequireAll {
    fn requires_approval(&self, _call: &ToolCall) -> bool {
        true
    }
}

/// Gates only the named tools; everything else runs directly.
#[derive(Debug, Default)]
pub struct RequireNamed {
    tools: HashSet<String>,
}

impl RequireNamed {
    pub fn new(tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }
}

impl ApprovalPolicy for RequireNamed {
    fn requires_approval(&self, call: &ToolCall) -> bool {
        self.tools.contains(&call.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "t1".to_string(),
            name: name.to_string(),
            arguments: json!({}),
            working_dir: None,
        }
    }

    #[test]
    fn require_all_gates_everything() {
        assert!(RequireAll.requires_approval(&call("list_files")));
    }

    #[test]
    fn require_named_gates_only_listed_tools() {
        let policy = RequireNamed::new(["delete_file", "run_shell"]);
        assert!(policy.requires_approval(&call("delete_file")));
        assert!(!policy.requires_approval(&call("list_files")));
    }
}
