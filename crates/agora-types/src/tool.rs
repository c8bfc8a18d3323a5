//! Tool calls and the approval protocol types.
//!
//! Internally a tool call an agent emits is either `Direct` (executable as
//! soon as policy allows) or an `ApprovalRequest` wrapping the original call
//! it stands in for. The `request_approval` sentinel name exists only in the
//! wire form; nothing away from the serialization boundary matches on it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApprovalError;

/// Virtual tool name carried by approval requests on the wire.
pub const APPROVAL_TOOL: &str = "request_approval";

/// Argument key holding the wrapped call inside an approval request.
const ORIGINAL_CALL_KEY: &str = "original_tool_call";

/// A tool invocation as it appears in an assistant message.
///
/// `id` is the correlation key: the eventual tool-result message must carry
/// the same value as its `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Typed distinction between an ordinary call and a pending approval.
///
/// Serializes as the wire `ToolCall` form so assistant messages containing
/// approval requests look like any other tool call to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ToolCall", try_from = "ToolCall")]
pub enum AgentToolCall {
    /// Executable without a human decision.
    Direct(ToolCall),
    /// Synthetic call standing in for `original` until a decision arrives.
    /// `id` is distinct from `original.id`.
    ApprovalRequest { id: String, original: ToolCall },
}

impl AgentToolCall {
    /// Wrap a call that requires approval, minting a fresh request id.
    pub fn request_approval(original: ToolCall) -> Self {
        AgentToolCall::ApprovalRequest {
            id: format!("approval_{}", uuid::Uuid::now_v7().simple()),
            original,
        }
    }

    /// The id a decision or tool result must address.
    pub fn id(&self) -> &str {
        match self {
            AgentToolCall::Direct(call) => &call.id,
            AgentToolCall::ApprovalRequest { id, .. } => id,
        }
    }

    /// Tool name as a client sees it.
    pub fn tool_name(&self) -> &str {
        match self {
            AgentToolCall::Direct(call) => &call.name,
            AgentToolCall::ApprovalRequest { .. } => APPROVAL_TOOL,
        }
    }

    pub fn is_approval_request(&self) -> bool {
        matches!(self, AgentToolCall::ApprovalRequest { .. })
    }
}

impl From<AgentToolCall> for ToolCall {
    fn from(call: AgentToolCall) -> Self {
        match call {
            AgentToolCall::Direct(call) => call,
            AgentToolCall::ApprovalRequest { id, original } => {
                let tool_name = original.name.clone();
                ToolCall {
                    id,
                    name: APPROVAL_TOOL.to_string(),
                    arguments: serde_json::json!({
                        "original_tool_call": original,
                        "tool_name": tool_name,
                    }),
                    working_dir: None,
                }
            }
        }
    }
}

impl TryFrom<ToolCall> for AgentToolCall {
    type Error = ApprovalError;

    fn try_from(call: ToolCall) -> Result<Self, Self::Error> {
        if call.name != APPROVAL_TOOL {
            return Ok(AgentToolCall::Direct(call));
        }
        let original = call
            .arguments
            .get(ORIGINAL_CALL_KEY)
            .cloned()
            .ok_or_else(|| {
                ApprovalError::MalformedRequest(format!("missing {ORIGINAL_CALL_KEY}"))
            })?;
        let original: ToolCall = serde_json::from_value(original)
            .map_err(|e| ApprovalError::MalformedRequest(e.to_string()))?;
        Ok(AgentToolCall::ApprovalRequest {
            id: call.id,
            original,
        })
    }
}

/// Result of a completed tool execution, per the executor contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub exit_code: i32,
    pub output: String,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A human decision on an open approval request.
///
/// `tool_call_id` addresses the ApprovalRequest's id, never the wrapped
/// call's id. Delivered over the ordinary tool-result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub tool_call_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub scope: ApprovalScope,
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Approve or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}

impl FromStr for Decision {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "deny" => Ok(Decision::Deny),
            other => Err(ApprovalError::MalformedRequest(format!(
                "unknown decision: '{other}'"
            ))),
        }
    }
}

/// How long a decision's authorization lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalScope {
    /// Authorizes exactly this invocation.
    #[default]
    Once,
    /// Bypasses approval for equivalent calls for the rest of the session.
    Persistent,
}
