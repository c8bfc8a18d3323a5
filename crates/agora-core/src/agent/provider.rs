//! LlmProvider trait definition.
//!
//! The provider produces one agent turn as a stream of events: text deltas,
//! fully-received tool calls, and a terminal end or error. The turn runner
//! republishes these onto the world bus and collects the tool calls for
//! gating. Real provider backends live outside the core crate; the
//! `ScriptedProvider` here replays canned turns for tests and demos.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use futures_util::Stream;
use thiserror::Error;

use agora_types::event::TokenUsage;
use agora_types::memory::AgentMemoryMessage;
use agora_types::tool::ToolCall;

/// One event in a provider's turn stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The provider has started producing the turn.
    Start,
    /// A delta of assistant text.
    Delta(String),
    /// A tool call has been fully received.
    ToolUse(ToolCall),
    /// The turn finished normally.
    End { usage: Option<TokenUsage> },
    /// The provider failed mid-turn. Terminal.
    Error(String),
}

/// Boxed turn stream. Boxed rather than RPITIT so providers stay
/// object-safe behind `Arc<dyn LlmProvider>`.
pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send + 'static>>;

/// Everything a provider needs to produce one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub agent_id: String,
    /// Chat context, oldest message first.
    pub messages: Vec<AgentMemoryMessage>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Trait for agent turn backends.
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Open a turn stream for the given context.
    fn stream_turn(&self, request: TurnRequest) -> Result<ProviderStream, ProviderError>;
}

/// Provider that replays pre-recorded turns in order.
///
/// Each call to `stream_turn` pops the next scripted turn; once the script
/// is exhausted every further turn is an empty `Start`/`End` pair. Used by
/// the core tests and the demo world wiring.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<ProviderEvent>>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream_turn(&self, _request: TurnRequest) -> Result<ProviderStream, ProviderError> {
        let turn = {
            let mut turns = self
                .turns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            turns.pop_front()
        };
        let events = turn.unwrap_or_else(|| vec![ProviderEvent::Start, ProviderEvent::End { usage: None }]);
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripted_provider_replays_turns_in_order() {
        let provider = ScriptedProvider::new(vec![
            vec![
                ProviderEvent::Start,
                ProviderEvent::Delta("first".to_string()),
                ProviderEvent::End { usage: None },
            ],
            vec![
                ProviderEvent::Start,
                ProviderEvent::Delta("second".to_string()),
                ProviderEvent::End { usage: None },
            ],
        ]);
        let request = TurnRequest {
            agent_id: "planner".to_string(),
            messages: Vec::new(),
        };

        let first: Vec<_> = provider.stream_turn(request.clone()).unwrap().collect().await;
        let second: Vec<_> = provider.stream_turn(request.clone()).unwrap().collect().await;

        assert!(matches!(&first[1], ProviderEvent::Delta(text) if text == "first"));
        assert!(matches!(&second[1], ProviderEvent::Delta(text) if text == "second"));
    }

    #[tokio::test]
    async fn exhausted_script_yields_empty_turns() {
        let provider = ScriptedProvider::new(Vec::new());
        let request = TurnRequest {
            agent_id: "planner".to_string(),
            messages: Vec::new(),
        };

        let events: Vec<_> = provider.stream_turn(request).unwrap().collect().await;
        assert_eq!(
            events,
            vec![ProviderEvent::Start, ProviderEvent::End { usage: None }]
        );
    }
}
