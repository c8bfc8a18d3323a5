//! Conversation memory entries.
//!
//! `AgentMemoryMessage` is the durable, role-tagged record of one chat turn.
//! The threading invariant: every tool-role message must answer a tool call
//! id emitted by an earlier assistant message in the same chat. The approval
//! protocol inserts an extra assistant/tool pair per approval cycle and must
//! keep this invariant intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::tool::ToolCall;

/// Role of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// One conversation entry as persisted and replayed to providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemoryMessage {
    pub id: Uuid,
    /// Chat the entry belongs to. Worlds key chats as `<world>/<agent>`.
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Tool calls emitted by an assistant entry. Approval requests appear
    /// here in wire form, under the sentinel name, like any other call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool-role entries, the call this entry answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentMemoryMessage {
    fn new(chat_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(chat_id, MessageRole::System, content)
    }

    pub fn user(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(chat_id, MessageRole::User, content)
    }

    /// Assistant entry, optionally carrying the turn's tool calls.
    pub fn assistant(
        chat_id: impl Into<String>,
        content: impl Into<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Self {
        let mut msg = Self::new(chat_id, MessageRole::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Tool-result entry answering `tool_call_id`.
    pub fn tool(
        chat_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(chat_id, MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// Check the threading invariant over a chat history in order.
///
/// Returns false if any tool-role entry lacks a `tool_call_id` or answers an
/// id no earlier assistant entry emitted.
pub fn thread_is_consistent(messages: &[AgentMemoryMessage]) -> bool {
    let mut emitted: HashSet<&str> = HashSet::new();
    for msg in messages {
        match msg.role {
            MessageRole::Assistant => {
                if let Some(calls) = &msg.tool_calls {
                    emitted.extend(calls.iter().map(|c| c.id.as_str()));
                }
            }
            MessageRole::Tool => match msg.tool_call_id.as_deref() {
                Some(id) if emitted.contains(id) => {}
                _ => return false,
            },
            MessageRole::System | MessageRole::User => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "list_files".to_string(),
            arguments: json!({}),
            working_dir: None,
        }
    }

    #[test]
    fn test_role_display_from_str() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            assert_eq!(role.to_string().parse::<MessageRole>().unwrap(), role);
        }
        assert!("function".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_absent_tool_fields_skipped_on_wire() {
        let msg = AgentMemoryMessage::user("w1/coder", "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_thread_consistency_holds_for_ordered_pair() {
        let messages = vec![
            AgentMemoryMessage::user("w1/coder", "list the files"),
            AgentMemoryMessage::assistant("w1/coder", "", Some(vec![call("t1")])),
            AgentMemoryMessage::tool("w1/coder", "t1", "src/ tests/"),
        ];
        assert!(thread_is_consistent(&messages));
    }

    #[test]
    fn test_thread_consistency_rejects_orphan_tool_result() {
        let messages = vec![
            AgentMemoryMessage::user("w1/coder", "list the files"),
            AgentMemoryMessage::tool("w1/coder", "t9", "src/ tests/"),
        ];
        assert!(!thread_is_consistent(&messages));
    }

    #[test]
    fn test_thread_consistency_rejects_result_before_call() {
        let messages = vec![
            AgentMemoryMessage::tool("w1/coder", "t1", "early"),
            AgentMemoryMessage::assistant("w1/coder", "", Some(vec![call("t1")])),
        ];
        assert!(!thread_is_consistent(&messages));
    }
}
