//! Event envelope for the Agora world event bus.
//!
//! `WorldEvent` is the canonical published form: a v7 id, a UTC timestamp,
//! and a typed payload. Payloads are a closed tagged union -- one variant per
//! wire event type -- validated before they are accepted by the bus.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// A published event. Immutable once constructed; the bus retains it only in
/// bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEvent {
    /// Unique per publish, time-sortable.
    pub id: Uuid,
    /// Stamped by the bus at publish time.
    pub timestamp: DateTime<Utc>,
    /// Type-specific content. The `type` tag is flattened into the envelope
    /// on the wire.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl WorldEvent {
    /// Stamp a payload with a fresh id and the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Payload variants, one per event type.
///
/// Each variant carries only the fields that type actually uses. `agent_id`,
/// where present, is the key for per-agent routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    /// A conversational message between agents or from the user.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        content: String,
    },

    /// One element of an LLM provider's token stream, republished verbatim.
    SseChunk {
        agent_id: String,
        phase: StreamPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },

    /// Operational notice not attributed to any agent.
    System { message: String },

    /// Activity transition for a world, emitted by the activity tracker.
    WorldActivity {
        world_id: String,
        phase: ActivityPhase,
        /// Shared by the `response-start`/`idle` pair bounding one turn.
        activity_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// A tool execution has been dispatched.
    ToolStart {
        agent_id: String,
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<serde_json::Value>,
    },

    /// A tool execution completed; also carries approval decisions, which
    /// ride the ordinary tool-result channel.
    ToolResult {
        agent_id: String,
        tool_call_id: String,
        tool_name: String,
        result: String,
    },

    /// A tool execution failed. Converted to conversational content by the
    /// coordinator, never propagated as a process failure.
    ToolError {
        agent_id: String,
        tool_call_id: String,
        tool_name: String,
        error: String,
    },

    /// Incremental progress from a long-running tool.
    ToolProgress {
        agent_id: String,
        tool_call_id: String,
        message: String,
    },
}

impl EventPayload {
    /// The discriminant for counters and history filters.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::SseChunk { .. } => EventKind::SseChunk,
            EventPayload::System { .. } => EventKind::System,
            EventPayload::WorldActivity { .. } => EventKind::WorldActivity,
            EventPayload::ToolStart { .. } => EventKind::ToolStart,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::ToolError { .. } => EventKind::ToolError,
            EventPayload::ToolProgress { .. } => EventKind::ToolProgress,
        }
    }

    /// Returns the agent id from variants that carry one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            EventPayload::Message { agent_id, .. } => agent_id.as_deref(),
            EventPayload::SseChunk { agent_id, .. }
            | EventPayload::ToolStart { agent_id, .. }
            | EventPayload::ToolResult { agent_id, .. }
            | EventPayload::ToolError { agent_id, .. }
            | EventPayload::ToolProgress { agent_id, .. } => Some(agent_id),
            EventPayload::System { .. } | EventPayload::WorldActivity { .. } => None,
        }
    }

    /// Check the payload at the publish boundary. A rejected payload is never
    /// recorded or dispatched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EventPayload::Message { agent_id, content } => {
                if content.is_empty() {
                    return Err(ValidationError::EmptyField("content"));
                }
                if matches!(agent_id.as_deref(), Some("")) {
                    return Err(ValidationError::EmptyField("agent_id"));
                }
            }
            EventPayload::SseChunk {
                agent_id,
                phase,
                content,
                ..
            } => {
                require(agent_id, "agent_id")?;
                if *phase == StreamPhase::Chunk && content.is_none() {
                    return Err(ValidationError::MissingField("content"));
                }
            }
            EventPayload::System { message } => {
                require(message, "message")?;
            }
            EventPayload::WorldActivity { world_id, .. } => {
                require(world_id, "world_id")?;
            }
            EventPayload::ToolStart {
                agent_id,
                tool_call_id,
                tool_name,
                ..
            }
            | EventPayload::ToolResult {
                agent_id,
                tool_call_id,
                tool_name,
                ..
            }
            | EventPayload::ToolError {
                agent_id,
                tool_call_id,
                tool_name,
                ..
            } => {
                require(agent_id, "agent_id")?;
                require(tool_call_id, "tool_call_id")?;
                require(tool_name, "tool_name")?;
            }
            EventPayload::ToolProgress {
                agent_id,
                tool_call_id,
                ..
            } => {
                require(agent_id, "agent_id")?;
                require(tool_call_id, "tool_call_id")?;
            }
        }
        Ok(())
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// Position of an SSE chunk within a provider stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Start,
    Chunk,
    End,
    Error,
}

/// Which side of an activity turn a world-activity event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityPhase {
    ResponseStart,
    Idle,
}

/// Token accounting reported at the end of a provider stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Event type discriminant. Used as the counter key in bus stats and the
/// type filter in history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    SseChunk,
    System,
    WorldActivity,
    ToolStart,
    ToolResult,
    ToolError,
    ToolProgress,
}

impl EventKind {
    /// All kinds, in a stable order.
    pub const ALL: [EventKind; 8] = [
        EventKind::Message,
        EventKind::SseChunk,
        EventKind::System,
        EventKind::WorldActivity,
        EventKind::ToolStart,
        EventKind::ToolResult,
        EventKind::ToolError,
        EventKind::ToolProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::SseChunk => "sse-chunk",
            EventKind::System => "system",
            EventKind::WorldActivity => "world-activity",
            EventKind::ToolStart => "tool-start",
            EventKind::ToolResult => "tool-result",
            EventKind::ToolError => "tool-error",
            EventKind::ToolProgress => "tool-progress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventKind::Message),
            "sse-chunk" => Ok(EventKind::SseChunk),
            "system" => Ok(EventKind::System),
            "world-activity" => Ok(EventKind::WorldActivity),
            "tool-start" => Ok(EventKind::ToolStart),
            "tool-result" => Ok(EventKind::ToolResult),
            "tool-error" => Ok(EventKind::ToolError),
            "tool-progress" => Ok(EventKind::ToolProgress),
            other => Err(ValidationError::UnknownEventType(other.to_string())),
        }
    }
}

/// History query. All clauses are conjunctive; `limit` is applied last and
/// keeps the most recent entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<EventKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Whether an event passes the kind/agent/since clauses. `limit` is not
    /// a per-event predicate and is handled by the bus.
    pub fn matches(&self, event: &WorldEvent) -> bool {
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.payload.kind())
        {
            return false;
        }
        if let Some(agent_id) = &self.agent_id
            && event.payload.agent_id() != Some(agent_id.as_str())
        {
            return false;
        }
        if let Some(since) = self.since
            && event.timestamp < since
        {
            return false;
        }
        true
    }
}

/// Point-in-time bus counters, as returned by `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub total_events: u64,
    pub events_by_kind: HashMap<EventKind, u64>,
    pub history_size: usize,
    pub active_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape_flattens_type_tag() {
        let event = WorldEvent::new(EventPayload::SseChunk {
            agent_id: "planner".to_string(),
            phase: StreamPhase::Chunk,
            content: Some("hello".to_string()),
            usage: None,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sse-chunk");
        assert_eq!(json["agent_id"], "planner");
        assert_eq!(json["phase"], "chunk");
        assert!(json.get("usage").is_none());
        assert!(json.get("id").is_some());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_world_activity_roundtrip() {
        let event = WorldEvent::new(EventPayload::WorldActivity {
            world_id: "w1".to_string(),
            phase: ActivityPhase::ResponseStart,
            activity_id: Uuid::now_v7(),
            source: Some("broadcast".to_string()),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"world-activity\""));
        assert!(json.contains("\"phase\":\"response-start\""));

        let back: WorldEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.payload.kind(), EventKind::WorldActivity);
    }

    #[test]
    fn test_agent_id_accessor() {
        let with_agent = EventPayload::ToolStart {
            agent_id: "coder".to_string(),
            tool_call_id: "t1".to_string(),
            tool_name: "list_files".to_string(),
            arguments: None,
        };
        assert_eq!(with_agent.agent_id(), Some("coder"));

        let without = EventPayload::System {
            message: "world ready".to_string(),
        };
        assert_eq!(without.agent_id(), None);
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let payload = EventPayload::Message {
            agent_id: None,
            content: String::new(),
        };
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::EmptyField("content"))
        ));
    }

    #[test]
    fn test_validate_chunk_requires_content() {
        let payload = EventPayload::SseChunk {
            agent_id: "planner".to_string(),
            phase: StreamPhase::Chunk,
            content: None,
            usage: None,
        };
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::MissingField("content"))
        ));

        let end = EventPayload::SseChunk {
            agent_id: "planner".to_string(),
            phase: StreamPhase::End,
            content: None,
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            }),
        };
        assert!(end.validate().is_ok());
    }

    #[test]
    fn test_event_kind_display_from_str() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("chat-message".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_filter_matches_kind_and_agent() {
        let event = WorldEvent::new(EventPayload::ToolResult {
            agent_id: "coder".to_string(),
            tool_call_id: "t1".to_string(),
            tool_name: "list_files".to_string(),
            result: "ok".to_string(),
        });

        let by_kind = EventFilter {
            kinds: Some(vec![EventKind::ToolResult, EventKind::ToolError]),
            ..Default::default()
        };
        assert!(by_kind.matches(&event));

        let wrong_agent = EventFilter {
            agent_id: Some("planner".to_string()),
            ..Default::default()
        };
        assert!(!wrong_agent.matches(&event));

        let future = EventFilter {
            since: Some(event.timestamp + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!future.matches(&event));
    }
}
