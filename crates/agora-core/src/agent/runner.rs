//! Turn execution.
//!
//! One turn: append the inbound user message if present, replay the chat to
//! the provider, republish its stream onto the world bus, then persist the
//! assistant message with its tool calls gated through the approval
//! coordinator. Direct calls execute inline; held calls wait for a decision
//! and come back through the resume worker as a fresh turn.
//!
//! Activity accounting brackets every turn. An ordinary turn starts a slot
//! and releases it at the end, errors included. A resumed turn inherits the
//! slot the open approval was holding, so it only releases.

use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use agora_types::error::{RepositoryError, ValidationError};
use agora_types::event::{EventPayload, StreamPhase};
use agora_types::memory::AgentMemoryMessage;
use agora_types::tool::{AgentToolCall, ToolCall};

use crate::agent::executor::ToolExecutor;
use crate::agent::provider::{LlmProvider, ProviderError, ProviderEvent, TurnRequest};
use crate::approval::{ApprovalCoordinator, ResumeRequest};
use crate::event::EventBus;
use crate::repository::MemoryRepository;
use crate::world::ActivityTracker;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),
}

/// Drives one agent's turns in one world at a time.
pub struct TurnRunner<P, E, M> {
    bus: EventBus,
    tracker: Arc<ActivityTracker>,
    provider: Arc<P>,
    executor: Arc<E>,
    memory: Arc<M>,
    coordinator: Arc<ApprovalCoordinator<E, M>>,
}

impl<P, E, M> TurnRunner<P, E, M>
where
    P: LlmProvider + 'static,
    E: ToolExecutor + 'static,
    M: MemoryRepository + 'static,
{
    pub fn new(
        bus: EventBus,
        tracker: Arc<ActivityTracker>,
        provider: Arc<P>,
        executor: Arc<E>,
        memory: Arc<M>,
        coordinator: Arc<ApprovalCoordinator<E, M>>,
    ) -> Self {
        Self {
            bus,
            tracker,
            provider,
            executor,
            memory,
            coordinator,
        }
    }

    /// Run one turn, optionally seeded with a user message.
    ///
    /// Returns the assistant's collected text. The world goes active before
    /// any event is published and idle once the turn is over, whatever the
    /// outcome; calls held for approval keep their own slot beyond that.
    pub async fn run_turn(
        &self,
        world_id: &str,
        agent_id: &str,
        user_message: Option<&str>,
    ) -> Result<String, TurnError> {
        self.tracker.response_start(world_id, Some(agent_id))?;
        self.finish_turn(world_id, agent_id, user_message).await
    }

    /// Run the follow-up turn after a resolved approval cycle.
    ///
    /// The open approval held the world's activity slot; this turn inherits
    /// it instead of starting a fresh one.
    pub async fn run_resumed_turn(
        &self,
        world_id: &str,
        agent_id: &str,
    ) -> Result<String, TurnError> {
        self.finish_turn(world_id, agent_id, None).await
    }

    /// Consume resume requests until the coordinator side closes.
    pub fn spawn_resume_worker(
        self: Arc<Self>,
        mut resumes: mpsc::Receiver<ResumeRequest>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = resumes.recv().await {
                tracing::debug!(
                    world_id = %request.world_id,
                    agent_id = %request.agent_id,
                    "resuming agent after approval cycle"
                );
                if let Err(err) = self
                    .run_resumed_turn(&request.world_id, &request.agent_id)
                    .await
                {
                    tracing::error!(
                        world_id = %request.world_id,
                        agent_id = %request.agent_id,
                        error = %err,
                        "resumed turn failed"
                    );
                }
            }
        })
    }

    async fn finish_turn(
        &self,
        world_id: &str,
        agent_id: &str,
        user_message: Option<&str>,
    ) -> Result<String, TurnError> {
        let chat_id = format!("{world_id}/{agent_id}");
        let result = self
            .run_turn_inner(world_id, agent_id, &chat_id, user_message)
            .await;
        if let Err(err) = self.tracker.idle(world_id) {
            tracing::warn!(world_id, error = %err, "idle signal failed");
        }
        result
    }

    async fn run_turn_inner(
        &self,
        world_id: &str,
        agent_id: &str,
        chat_id: &str,
        user_message: Option<&str>,
    ) -> Result<String, TurnError> {
        if let Some(text) = user_message {
            self.memory
                .append_message(&AgentMemoryMessage::user(chat_id, text))
                .await?;
            self.publish(
                world_id,
                EventPayload::Message {
                    agent_id: None,
                    content: text.to_string(),
                },
            );
        }

        let context = self.memory.load_chat(chat_id).await?;
        let mut stream = self.provider.stream_turn(TurnRequest {
            agent_id: agent_id.to_string(),
            messages: context,
        })?;

        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                ProviderEvent::Start => self.publish(
                    world_id,
                    EventPayload::SseChunk {
                        agent_id: agent_id.to_string(),
                        phase: StreamPhase::Start,
                        content: None,
                        usage: None,
                    },
                ),
                ProviderEvent::Delta(delta) => {
                    text.push_str(&delta);
                    self.publish(
                        world_id,
                        EventPayload::SseChunk {
                            agent_id: agent_id.to_string(),
                            phase: StreamPhase::Chunk,
                            content: Some(delta),
                            usage: None,
                        },
                    );
                }
                ProviderEvent::ToolUse(call) => calls.push(call),
                ProviderEvent::End { usage } => self.publish(
                    world_id,
                    EventPayload::SseChunk {
                        agent_id: agent_id.to_string(),
                        phase: StreamPhase::End,
                        content: None,
                        usage,
                    },
                ),
                ProviderEvent::Error(message) => {
                    self.publish(
                        world_id,
                        EventPayload::SseChunk {
                            agent_id: agent_id.to_string(),
                            phase: StreamPhase::Error,
                            content: Some(message.clone()),
                            usage: None,
                        },
                    );
                    return Err(ProviderError::Unavailable(message).into());
                }
            }
        }

        let gated = self
            .coordinator
            .gate_calls(world_id, agent_id, chat_id, calls);
        let wire: Vec<ToolCall> = gated.iter().cloned().map(ToolCall::from).collect();
        let assistant =
            AgentMemoryMessage::assistant(chat_id, &text, (!wire.is_empty()).then_some(wire));
        self.memory.append_message(&assistant).await?;
        if !text.is_empty() {
            self.publish(
                world_id,
                EventPayload::Message {
                    agent_id: Some(agent_id.to_string()),
                    content: text.clone(),
                },
            );
        }

        for call in &gated {
            if let AgentToolCall::Direct(call) = call {
                self.run_direct(world_id, agent_id, chat_id, call).await?;
            }
        }

        Ok(text)
    }

    /// Execute an ungated call inline. Failures become conversational
    /// content, never turn errors.
    async fn run_direct(
        &self,
        world_id: &str,
        agent_id: &str,
        chat_id: &str,
        call: &ToolCall,
    ) -> Result<(), TurnError> {
        self.publish(
            world_id,
            EventPayload::ToolStart {
                agent_id: agent_id.to_string(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: Some(call.arguments.clone()),
            },
        );

        match self.executor.execute(call).await {
            Ok(outcome) => {
                self.memory
                    .append_message(&AgentMemoryMessage::tool(chat_id, &call.id, &outcome.output))
                    .await?;
                self.publish(
                    world_id,
                    EventPayload::ToolResult {
                        agent_id: agent_id.to_string(),
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: outcome.output,
                    },
                );
            }
            Err(err) => {
                let error_text = format!("Tool '{}' failed: {err}", call.name);
                self.memory
                    .append_message(&AgentMemoryMessage::tool(chat_id, &call.id, &error_text))
                    .await?;
                self.publish(
                    world_id,
                    EventPayload::ToolError {
                        agent_id: agent_id.to_string(),
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error: error_text,
                    },
                );
            }
        }
        Ok(())
    }

    fn publish(&self, world_id: &str, payload: EventPayload) {
        if let Err(err) = self.bus.publish(world_id, payload) {
            tracing::error!(world_id, error = %err, "event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::ScriptedProvider;
    use crate::approval::{ApprovalPolicy, RequireAll, RequireNamed};
    use agora_types::error::ToolExecutionError;
    use agora_types::event::{ActivityPhase, EventKind, TokenUsage};
    use agora_types::memory::thread_is_consistent;
    use agora_types::tool::{
        APPROVAL_TOOL, ApprovalDecision, ApprovalScope, Decision, ToolOutcome,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<ToolCall>>,
    }

    impl RecordingExecutor {
        fn executed(&self) -> Vec<ToolCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolExecutor for RecordingExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome, ToolExecutionError> {
            self.calls.lock().unwrap().push(call.clone());
            Ok(ToolOutcome {
                exit_code: 0,
                output: "src/ tests/".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct InMemoryChat {
        messages: Mutex<Vec<AgentMemoryMessage>>,
    }

    impl InMemoryChat {
        fn messages(&self) -> Vec<AgentMemoryMessage> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl MemoryRepository for InMemoryChat {
        async fn append_message(&self, message: &AgentMemoryMessage) -> Result<(), RepositoryError> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn load_chat(&self, chat_id: &str) -> Result<Vec<AgentMemoryMessage>, RepositoryError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .cloned()
                .collect())
        }
    }

    struct Harness {
        bus: EventBus,
        tracker: Arc<ActivityTracker>,
        executor: Arc<RecordingExecutor>,
        memory: Arc<InMemoryChat>,
        coordinator: Arc<ApprovalCoordinator<RecordingExecutor, InMemoryChat>>,
        runner: Arc<TurnRunner<ScriptedProvider, RecordingExecutor, InMemoryChat>>,
        resume_rx: mpsc::Receiver<ResumeRequest>,
    }

    fn harness(turns: Vec<Vec<ProviderEvent>>, policy: Arc<dyn ApprovalPolicy>) -> Harness {
        let bus = EventBus::new(64);
        let tracker = Arc::new(ActivityTracker::new(bus.clone()));
        let executor = Arc::new(RecordingExecutor::default());
        let memory = Arc::new(InMemoryChat::default());
        let (resume_tx, resume_rx) = mpsc::channel(8);
        let coordinator = Arc::new(ApprovalCoordinator::new(
            bus.clone(),
            tracker.clone(),
            executor.clone(),
            memory.clone(),
            policy,
            resume_tx,
        ));
        let runner = Arc::new(TurnRunner::new(
            bus.clone(),
            tracker.clone(),
            Arc::new(ScriptedProvider::new(turns)),
            executor.clone(),
            memory.clone(),
            coordinator.clone(),
        ));
        Harness {
            bus,
            tracker,
            executor,
            memory,
            coordinator,
            runner,
            resume_rx,
        }
    }

    fn list_files() -> ToolCall {
        ToolCall {
            id: "t1".to_string(),
            name: "list_files".to_string(),
            arguments: json!({"path": "."}),
            working_dir: None,
        }
    }

    fn approve(id: &str) -> ApprovalDecision {
        ApprovalDecision {
            tool_call_id: id.to_string(),
            decision: Decision::Approve,
            scope: ApprovalScope::Once,
            tool_name: "list_files".to_string(),
            tool_args: json!({"path": "."}),
            working_dir: None,
        }
    }

    fn activity_ids(bus: &EventBus, phase: ActivityPhase) -> Vec<Uuid> {
        bus.history(None)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::WorldActivity {
                    phase: p,
                    activity_id,
                    ..
                } if p == phase => Some(activity_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn plain_turn_streams_text_and_goes_idle() {
        let h = harness(
            vec![vec![
                ProviderEvent::Start,
                ProviderEvent::Delta("Hello".to_string()),
                ProviderEvent::Delta(" world".to_string()),
                ProviderEvent::End {
                    usage: Some(TokenUsage {
                        input_tokens: 12,
                        output_tokens: 4,
                    }),
                },
            ]],
            Arc::new(RequireAll),
        );

        let text = h.runner.run_turn("w1", "coder", Some("hi")).await.unwrap();

        assert_eq!(text, "Hello world");
        assert!(!h.tracker.is_active("w1"));

        let messages = h.memory.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello world");
        assert!(messages[1].tool_calls.is_none());
        assert!(thread_is_consistent(&messages));

        // one full activity bracket with a stable id
        let starts = activity_ids(&h.bus, ActivityPhase::ResponseStart);
        let idles = activity_ids(&h.bus, ActivityPhase::Idle);
        assert_eq!(starts.len(), 1);
        assert_eq!(idles, starts);

        let kinds: Vec<_> = h
            .bus
            .history(None)
            .into_iter()
            .map(|e| e.payload.kind())
            .collect();
        assert!(kinds.contains(&EventKind::Message));
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::SseChunk).count(),
            4
        );
    }

    #[tokio::test]
    async fn gated_turn_holds_the_world_active() {
        let h = harness(
            vec![vec![
                ProviderEvent::Start,
                ProviderEvent::ToolUse(list_files()),
                ProviderEvent::End { usage: None },
            ]],
            Arc::new(RequireAll),
        );

        let text = h
            .runner
            .run_turn("w1", "coder", Some("list the files"))
            .await
            .unwrap();

        assert_eq!(text, "");
        assert!(h.executor.executed().is_empty());
        assert_eq!(h.coordinator.pending_count(), 1);
        // the held call keeps the slot after the turn's own release
        assert!(h.tracker.is_active("w1"));

        let messages = h.memory.messages();
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, APPROVAL_TOOL);
        assert_eq!(calls[0].arguments["original_tool_call"]["id"], "t1");
    }

    #[tokio::test]
    async fn direct_calls_execute_inline() {
        let h = harness(
            vec![vec![
                ProviderEvent::Start,
                ProviderEvent::ToolUse(list_files()),
                ProviderEvent::End { usage: None },
            ]],
            Arc::new(RequireNamed::new(["delete_file"])),
        );

        h.runner
            .run_turn("w1", "coder", Some("list the files"))
            .await
            .unwrap();

        assert_eq!(h.executor.executed(), vec![list_files()]);
        assert!(!h.tracker.is_active("w1"));

        let messages = h.memory.messages();
        let tool_msg = messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("t1"))
            .unwrap();
        assert_eq!(tool_msg.content, "src/ tests/");
        assert!(thread_is_consistent(&messages));

        let kinds: Vec<_> = h
            .bus
            .history(None)
            .into_iter()
            .map(|e| e.payload.kind())
            .filter(|k| matches!(k, EventKind::ToolStart | EventKind::ToolResult))
            .collect();
        assert_eq!(kinds, vec![EventKind::ToolStart, EventKind::ToolResult]);
    }

    #[tokio::test]
    async fn approval_cycle_resumes_into_the_same_activity() {
        let mut h = harness(
            vec![
                vec![
                    ProviderEvent::Start,
                    ProviderEvent::ToolUse(list_files()),
                    ProviderEvent::End { usage: None },
                ],
                vec![
                    ProviderEvent::Start,
                    ProviderEvent::Delta("Files listed.".to_string()),
                    ProviderEvent::End { usage: None },
                ],
            ],
            Arc::new(RequireAll),
        );

        h.runner
            .run_turn("w1", "coder", Some("list the files"))
            .await
            .unwrap();
        let open = h.coordinator.open_approvals();
        assert_eq!(open.len(), 1);

        h.coordinator
            .resolve(approve(&open[0].approval_id))
            .await
            .unwrap();

        let resume = h.resume_rx.recv().await.unwrap();
        let text = h
            .runner
            .run_resumed_turn(&resume.world_id, &resume.agent_id)
            .await
            .unwrap();

        assert_eq!(text, "Files listed.");
        assert!(!h.tracker.is_active("w1"));

        // the whole cycle is one activity: one start, one matching idle
        let starts = activity_ids(&h.bus, ActivityPhase::ResponseStart);
        let idles = activity_ids(&h.bus, ActivityPhase::Idle);
        assert_eq!(starts.len(), 1);
        assert_eq!(idles, starts);

        // original result threads first, then the approval confirmation
        let result_ids: Vec<String> = h
            .bus
            .history(None)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::ToolResult { tool_call_id, .. } => Some(tool_call_id),
                _ => None,
            })
            .collect();
        assert_eq!(
            result_ids,
            vec!["t1".to_string(), open[0].approval_id.clone()]
        );

        assert!(thread_is_consistent(&h.memory.messages()));
    }

    #[tokio::test]
    async fn provider_failure_still_goes_idle() {
        let h = harness(
            vec![vec![
                ProviderEvent::Start,
                ProviderEvent::Error("upstream went away".to_string()),
            ]],
            Arc::new(RequireAll),
        );

        let result = h.runner.run_turn("w1", "coder", Some("hi")).await;

        assert!(matches!(result, Err(TurnError::Provider(_))));
        assert!(!h.tracker.is_active("w1"));

        let error_chunks = h
            .bus
            .history(None)
            .into_iter()
            .filter(|e| {
                matches!(
                    &e.payload,
                    EventPayload::SseChunk {
                        phase: StreamPhase::Error,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(error_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_worker_drives_the_follow_up_turn() {
        let mut h = harness(
            vec![
                vec![
                    ProviderEvent::Start,
                    ProviderEvent::ToolUse(list_files()),
                    ProviderEvent::End { usage: None },
                ],
                vec![
                    ProviderEvent::Start,
                    ProviderEvent::Delta("Done.".to_string()),
                    ProviderEvent::End { usage: None },
                ],
            ],
            Arc::new(RequireAll),
        );

        h.runner
            .run_turn("w1", "coder", Some("list the files"))
            .await
            .unwrap();
        let open = h.coordinator.open_approvals();
        let resume_rx = std::mem::replace(&mut h.resume_rx, mpsc::channel(1).1);
        let worker = h.runner.clone().spawn_resume_worker(resume_rx);

        h.coordinator
            .resolve(approve(&open[0].approval_id))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.tracker.is_active("w1") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let messages = h.memory.messages();
        assert_eq!(messages.last().unwrap().content, "Done.");
        assert!(thread_is_consistent(&messages));
        worker.abort();
    }
}
