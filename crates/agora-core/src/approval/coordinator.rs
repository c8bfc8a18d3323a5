//! Tool approval coordinator.
//!
//! Gates side-effecting tool calls behind a human decision. A gated call is
//! held in an open-approvals registry and replaced, in the assistant message
//! the client sees, by a synthetic approval request wrapping the original
//! call verbatim. A decision addressed to the request id then resolves the
//! cycle:
//!
//! - deny: a denial notice is threaded back on the request id and the
//!   original call never reaches the executor.
//! - approve: the original call runs, its result is threaded back on the
//!   original call id first, then a confirmation answers the request id.
//!
//! Either way the agent is resumed exactly once, even under duplicate or
//! concurrent decisions for the same id. A decision with no matching open
//! approval is logged and ignored.
//!
//! An open approval also holds the world's activity slot. The world stays
//! active while a decision is outstanding, so a live stream does not close
//! under the watcher's matched idle; the resumed turn inherits the slot and
//! releases it when it completes. If no decision ever arrives the stream's
//! ceiling is the backstop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::mpsc;

use agora_types::error::ApprovalError;
use agora_types::event::EventPayload;
use agora_types::memory::AgentMemoryMessage;
use agora_types::tool::{
    APPROVAL_TOOL, AgentToolCall, ApprovalDecision, ApprovalScope, Decision, ToolCall, ToolOutcome,
};

use crate::agent::executor::ToolExecutor;
use crate::approval::policy::ApprovalPolicy;
use crate::event::EventBus;
use crate::repository::MemoryRepository;
use crate::world::ActivityTracker;

/// One gated call awaiting a decision. Inspectable via `open_approvals`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub approval_id: String,
    pub world_id: String,
    pub agent_id: String,
    pub chat_id: String,
    pub original: ToolCall,
    pub requested_at: DateTime<Utc>,
}

/// Ask the runner for a fresh assistant turn after a resolved cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub world_id: String,
    pub agent_id: String,
    pub chat_id: String,
}

/// What a resolved cycle amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Denied; the original call was never executed.
    Denied,
    /// Approved and executed to completion.
    Executed(ToolOutcome),
    /// Approved, but the executor failed to produce an outcome.
    ExecutionFailed(String),
}

/// Persistent grants are scoped to one tool for one agent in one world.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantKey {
    world_id: String,
    agent_id: String,
    tool_name: String,
}

/// Coordinates the approval round-trip between agent turns, the client,
/// and the tool executor.
pub struct ApprovalCoordinator<E, M> {
    bus: EventBus,
    tracker: Arc<ActivityTracker>,
    executor: Arc<E>,
    memory: Arc<M>,
    policy: Arc<dyn ApprovalPolicy>,
    resume_tx: mpsc::Sender<ResumeRequest>,
    pending: DashMap<String, PendingApproval>,
    resolved: DashSet<String>,
    grants: DashMap<GrantKey, DateTime<Utc>>,
}

impl<E, M> ApprovalCoordinator<E, M>
where
    E: ToolExecutor,
    M: MemoryRepository,
{
    pub fn new(
        bus: EventBus,
        tracker: Arc<ActivityTracker>,
        executor: Arc<E>,
        memory: Arc<M>,
        policy: Arc<dyn ApprovalPolicy>,
        resume_tx: mpsc::Sender<ResumeRequest>,
    ) -> Self {
        Self {
            bus,
            tracker,
            executor,
            memory,
            policy,
            resume_tx,
            pending: DashMap::new(),
            resolved: DashSet::new(),
            grants: DashMap::new(),
        }
    }

    /// Split a turn's tool calls into directly-executable calls and open
    /// approval requests.
    ///
    /// Each gated call gets its own request with a fresh id, registered
    /// before this returns so a decision can never race registration. Two
    /// identical calls in the same turn each get their own request; once
    /// scope never caches.
    pub fn gate_calls(
        &self,
        world_id: &str,
        agent_id: &str,
        chat_id: &str,
        calls: Vec<ToolCall>,
    ) -> Vec<AgentToolCall> {
        calls
            .into_iter()
            .map(|call| {
                if !self.policy.requires_approval(&call) {
                    return AgentToolCall::Direct(call);
                }
                if self.has_grant(world_id, agent_id, &call.name) {
                    tracing::debug!(
                        world_id,
                        agent_id,
                        tool_name = %call.name,
                        "persistent grant present, skipping approval"
                    );
                    return AgentToolCall::Direct(call);
                }
                self.hold_for_approval(world_id, agent_id, chat_id, call)
            })
            .collect()
    }

    fn hold_for_approval(
        &self,
        world_id: &str,
        agent_id: &str,
        chat_id: &str,
        call: ToolCall,
    ) -> AgentToolCall {
        let request = AgentToolCall::request_approval(call);
        if let AgentToolCall::ApprovalRequest { id, original } = &request {
            self.pending.insert(
                id.clone(),
                PendingApproval {
                    approval_id: id.clone(),
                    world_id: world_id.to_string(),
                    agent_id: agent_id.to_string(),
                    chat_id: chat_id.to_string(),
                    original: original.clone(),
                    requested_at: Utc::now(),
                },
            );
            tracing::info!(
                world_id,
                agent_id,
                approval_id = %id,
                tool_name = %original.name,
                "tool call held for approval"
            );
            // the held call keeps the world active until the resumed turn
            // releases the slot it inherits from us
            if let Err(err) = self.tracker.response_start(world_id, Some(agent_id)) {
                tracing::error!(world_id, error = %err, "activity hold failed");
            }
            // surface the open request as an ordinary tool start
            self.publish(
                world_id,
                EventPayload::ToolStart {
                    agent_id: agent_id.to_string(),
                    tool_call_id: id.clone(),
                    tool_name: APPROVAL_TOOL.to_string(),
                    arguments: Some(ToolCall::from(request.clone()).arguments),
                },
            );
        }
        request
    }

    /// Resolve one open approval.
    ///
    /// The registry removal is the idempotency guard: of any number of
    /// concurrent decisions for the same id, exactly one proceeds and
    /// triggers the resume. The rest see `AlreadyResolved`.
    pub async fn resolve(&self, decision: ApprovalDecision) -> Result<Resolution, ApprovalError> {
        let Some((_, pending)) = self.pending.remove(&decision.tool_call_id) else {
            if self.resolved.contains(&decision.tool_call_id) {
                tracing::warn!(
                    tool_call_id = %decision.tool_call_id,
                    "duplicate decision for resolved approval, ignoring"
                );
                return Err(ApprovalError::AlreadyResolved(decision.tool_call_id));
            }
            tracing::warn!(
                tool_call_id = %decision.tool_call_id,
                "decision references no open approval, ignoring"
            );
            return Err(ApprovalError::UnknownApproval(decision.tool_call_id));
        };
        self.resolved.insert(pending.approval_id.clone());

        if decision.tool_name != pending.original.name {
            tracing::warn!(
                approval_id = %pending.approval_id,
                decided = %decision.tool_name,
                held = %pending.original.name,
                "decision names a different tool than the held call"
            );
        }

        let resolution = match decision.decision {
            Decision::Deny => self.deny(&pending).await,
            Decision::Approve => {
                if decision.scope == ApprovalScope::Persistent {
                    self.record_grant(&pending);
                }
                self.approve(&pending).await
            }
        };

        let resume = ResumeRequest {
            world_id: pending.world_id.clone(),
            agent_id: pending.agent_id.clone(),
            chat_id: pending.chat_id.clone(),
        };
        if self.resume_tx.send(resume).await.is_err() {
            tracing::warn!(
                world_id = %pending.world_id,
                agent_id = %pending.agent_id,
                "resume channel closed, agent not resumed"
            );
        }

        Ok(resolution)
    }

    async fn deny(&self, pending: &PendingApproval) -> Resolution {
        let notice = format!(
            "Approval denied for tool '{}'. The call was not executed.",
            pending.original.name
        );
        self.append(AgentMemoryMessage::tool(
            &pending.chat_id,
            &pending.approval_id,
            &notice,
        ))
        .await;
        self.publish(
            &pending.world_id,
            EventPayload::ToolResult {
                agent_id: pending.agent_id.clone(),
                tool_call_id: pending.approval_id.clone(),
                tool_name: APPROVAL_TOOL.to_string(),
                result: notice,
            },
        );
        tracing::info!(
            approval_id = %pending.approval_id,
            tool_name = %pending.original.name,
            "approval denied"
        );
        Resolution::Denied
    }

    async fn approve(&self, pending: &PendingApproval) -> Resolution {
        let original = &pending.original;

        // re-emit the original call so its result has an assistant call to
        // answer; the request/confirmation pair brackets this one
        self.append(AgentMemoryMessage::assistant(
            &pending.chat_id,
            "",
            Some(vec![original.clone()]),
        ))
        .await;
        self.publish(
            &pending.world_id,
            EventPayload::ToolStart {
                agent_id: pending.agent_id.clone(),
                tool_call_id: original.id.clone(),
                tool_name: original.name.clone(),
                arguments: Some(original.arguments.clone()),
            },
        );

        match self.executor.execute(original).await {
            Ok(outcome) => {
                // original's result threads first, on the original id
                self.append(AgentMemoryMessage::tool(
                    &pending.chat_id,
                    &original.id,
                    &outcome.output,
                ))
                .await;
                self.publish(
                    &pending.world_id,
                    EventPayload::ToolResult {
                        agent_id: pending.agent_id.clone(),
                        tool_call_id: original.id.clone(),
                        tool_name: original.name.clone(),
                        result: outcome.output.clone(),
                    },
                );

                let confirmation = format!(
                    "Approved. Tool '{}' executed with exit code {}.",
                    original.name, outcome.exit_code
                );
                self.append(AgentMemoryMessage::tool(
                    &pending.chat_id,
                    &pending.approval_id,
                    &confirmation,
                ))
                .await;
                self.publish(
                    &pending.world_id,
                    EventPayload::ToolResult {
                        agent_id: pending.agent_id.clone(),
                        tool_call_id: pending.approval_id.clone(),
                        tool_name: APPROVAL_TOOL.to_string(),
                        result: confirmation,
                    },
                );
                tracing::info!(
                    approval_id = %pending.approval_id,
                    tool_name = %original.name,
                    exit_code = outcome.exit_code,
                    "approved tool executed"
                );
                Resolution::Executed(outcome)
            }
            Err(err) => {
                let error_text = format!("Tool '{}' failed: {err}", original.name);
                self.append(AgentMemoryMessage::tool(
                    &pending.chat_id,
                    &original.id,
                    &error_text,
                ))
                .await;
                self.publish(
                    &pending.world_id,
                    EventPayload::ToolError {
                        agent_id: pending.agent_id.clone(),
                        tool_call_id: original.id.clone(),
                        tool_name: original.name.clone(),
                        error: error_text.clone(),
                    },
                );

                let confirmation = format!(
                    "Approved, but tool '{}' failed to execute.",
                    original.name
                );
                self.append(AgentMemoryMessage::tool(
                    &pending.chat_id,
                    &pending.approval_id,
                    &confirmation,
                ))
                .await;
                self.publish(
                    &pending.world_id,
                    EventPayload::ToolResult {
                        agent_id: pending.agent_id.clone(),
                        tool_call_id: pending.approval_id.clone(),
                        tool_name: APPROVAL_TOOL.to_string(),
                        result: confirmation,
                    },
                );
                tracing::error!(
                    approval_id = %pending.approval_id,
                    tool_name = %original.name,
                    error = %err,
                    "approved tool failed"
                );
                Resolution::ExecutionFailed(error_text)
            }
        }
    }

    fn record_grant(&self, pending: &PendingApproval) {
        let key = GrantKey {
            world_id: pending.world_id.clone(),
            agent_id: pending.agent_id.clone(),
            tool_name: pending.original.name.clone(),
        };
        tracing::info!(
            world_id = %key.world_id,
            agent_id = %key.agent_id,
            tool_name = %key.tool_name,
            "persistent grant recorded"
        );
        self.grants.insert(key, Utc::now());
    }

    pub fn has_grant(&self, world_id: &str, agent_id: &str, tool_name: &str) -> bool {
        self.grants.contains_key(&GrantKey {
            world_id: world_id.to_string(),
            agent_id: agent_id.to_string(),
            tool_name: tool_name.to_string(),
        })
    }

    /// Snapshot of all open approvals across worlds.
    pub fn open_approvals(&self) -> Vec<PendingApproval> {
        self.pending.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Failures here are contained: an approval cycle never aborts because
    /// a memory append or event publish failed, it logs and carries on.
    async fn append(&self, message: AgentMemoryMessage) {
        if let Err(err) = self.memory.append_message(&message).await {
            tracing::error!(chat_id = %message.chat_id, error = %err, "memory append failed");
        }
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
    use crate::approval::policy::{RequireAll, RequireNamed};
    use agora_types::error::{RepositoryError, ToolExecutionError};
    use agora_types::event::EventKind;
    use agora_types::memory::thread_is_consistent;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingExecutor {
        calls: Mutex<Vec<ToolCall>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn executed(&self) -> Vec<ToolCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolExecutor for RecordingExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome, ToolExecutionError> {
            self.calls.lock().unwrap().push(call.clone());
            if self.fail {
                Err(ToolExecutionError::Spawn("exec format error".to_string()))
            } else {
                Ok(ToolOutcome {
                    exit_code: 0,
                    output: "src/ tests/".to_string(),
                })
            }
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
        coordinator: ApprovalCoordinator<RecordingExecutor, InMemoryChat>,
        resume_rx: mpsc::Receiver<ResumeRequest>,
    }

    fn harness_with(executor: RecordingExecutor, policy: Arc<dyn ApprovalPolicy>) -> Harness {
        let bus = EventBus::new(64);
        let tracker = Arc::new(ActivityTracker::new(bus.clone()));
        let executor = Arc::new(executor);
        let memory = Arc::new(InMemoryChat::default());
        let (resume_tx, resume_rx) = mpsc::channel(8);
        let coordinator = ApprovalCoordinator::new(
            bus.clone(),
            tracker.clone(),
            executor.clone(),
            memory.clone(),
            policy,
            resume_tx,
        );
        Harness {
            bus,
            tracker,
            executor,
            memory,
            coordinator,
            resume_rx,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingExecutor::new(), Arc::new(RequireAll))
    }

    fn list_files() -> ToolCall {
        ToolCall {
            id: "t1".to_string(),
            name: "list_files".to_string(),
            arguments: json!({"path": "."}),
            working_dir: None,
        }
    }

    fn decision(id: &str, decision: Decision, scope: ApprovalScope) -> ApprovalDecision {
        ApprovalDecision {
            tool_call_id: id.to_string(),
            decision,
            scope,
            tool_name: "list_files".to_string(),
            tool_args: json!({"path": "."}),
            working_dir: None,
        }
    }

    /// Gate one call and seed memory with the assistant message the runner
    /// would have appended, wire form included.
    async fn gate_one(h: &Harness, call: ToolCall) -> String {
        let gated = h
            .coordinator
            .gate_calls("w1", "coder", "w1/coder", vec![call]);
        assert_eq!(gated.len(), 1);
        assert!(gated[0].is_approval_request());
        let wire: Vec<ToolCall> = gated.iter().cloned().map(ToolCall::from).collect();
        h.memory
            .append_message(&AgentMemoryMessage::assistant("w1/coder", "", Some(wire)))
            .await
            .unwrap();
        gated[0].id().to_string()
    }

    #[tokio::test]
    async fn denied_call_never_reaches_the_executor() {
        let mut h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        let resolution = h
            .coordinator
            .resolve(decision(&approval_id, Decision::Deny, ApprovalScope::Once))
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Denied);
        assert!(h.executor.executed().is_empty());

        let messages = h.memory.messages();
        let last = messages.last().unwrap();
        assert_eq!(last.role, agora_types::memory::MessageRole::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some(approval_id.as_str()));
        assert!(last.content.contains("denied"));
        assert!(thread_is_consistent(&messages));

        // denial surfaces as an ordinary tool result on the request id
        let results: Vec<_> = h
            .bus
            .history(None)
            .into_iter()
            .filter(|e| e.payload.kind() == EventKind::ToolResult)
            .collect();
        assert_eq!(results.len(), 1);

        assert_eq!(h.resume_rx.recv().await.unwrap().agent_id, "coder");
        assert!(h.resume_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn approved_result_threads_to_the_original_call_id() {
        let mut h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        let resolution = h
            .coordinator
            .resolve(decision(&approval_id, Decision::Approve, ApprovalScope::Once))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::Executed(ref o) if o.success()));
        assert_eq!(h.executor.executed(), vec![list_files()]);

        // memory: wrapper assistant, re-emitted original, result on t1,
        // confirmation on the approval id, in that order
        let messages = h.memory.messages();
        let tool_ids: Vec<_> = messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["t1", approval_id.as_str()]);
        assert!(thread_is_consistent(&messages));

        let result_ids: Vec<String> = h
            .bus
            .history(None)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::ToolResult { tool_call_id, .. } => Some(tool_call_id),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["t1".to_string(), approval_id.clone()]);

        assert_eq!(h.resume_rx.recv().await.unwrap().chat_id, "w1/coder");
        assert!(h.resume_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn executor_failure_still_resolves_and_resumes() {
        let mut h = harness_with(RecordingExecutor::failing(), Arc::new(RequireAll));
        let approval_id = gate_one(&h, list_files()).await;

        let resolution = h
            .coordinator
            .resolve(decision(&approval_id, Decision::Approve, ApprovalScope::Once))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::ExecutionFailed(_)));

        let messages = h.memory.messages();
        assert!(thread_is_consistent(&messages));
        let t1_result = messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("t1"))
            .unwrap();
        assert!(t1_result.content.contains("failed"));

        let kinds: Vec<_> = h
            .bus
            .history(None)
            .into_iter()
            .map(|e| e.payload.kind())
            .filter(|k| matches!(k, EventKind::ToolError | EventKind::ToolResult))
            .collect();
        assert_eq!(kinds, vec![EventKind::ToolError, EventKind::ToolResult]);

        assert!(h.resume_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unknown_decision_is_logged_and_ignored() {
        let mut h = harness();

        let result = h
            .coordinator
            .resolve(decision("approval_bogus", Decision::Approve, ApprovalScope::Once))
            .await;

        assert!(matches!(result, Err(ApprovalError::UnknownApproval(_))));
        assert!(h.executor.executed().is_empty());
        assert!(h.memory.messages().is_empty());
        assert!(h.resume_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_decisions_resume_exactly_once() {
        let mut h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        let first = h
            .coordinator
            .resolve(decision(&approval_id, Decision::Approve, ApprovalScope::Once))
            .await;
        let second = h
            .coordinator
            .resolve(decision(&approval_id, Decision::Approve, ApprovalScope::Once))
            .await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(ApprovalError::AlreadyResolved(_))));
        assert_eq!(h.executor.executed().len(), 1);

        assert!(h.resume_rx.recv().await.is_some());
        assert!(h.resume_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn once_scope_regates_an_identical_call() {
        let h = harness();
        let first_id = gate_one(&h, list_files()).await;

        h.coordinator
            .resolve(decision(&first_id, Decision::Approve, ApprovalScope::Once))
            .await
            .unwrap();

        // structurally identical call on the next turn
        let gated = h
            .coordinator
            .gate_calls("w1", "coder", "w1/coder", vec![list_files()]);
        assert!(gated[0].is_approval_request());
        assert_ne!(gated[0].id(), first_id);
        assert_eq!(h.coordinator.pending_count(), 1);
    }

    #[tokio::test]
    async fn persistent_approval_bypasses_future_gating() {
        let h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        h.coordinator
            .resolve(decision(
                &approval_id,
                Decision::Approve,
                ApprovalScope::Persistent,
            ))
            .await
            .unwrap();

        assert!(h.coordinator.has_grant("w1", "coder", "list_files"));
        // same tool in a different world still gates
        assert!(!h.coordinator.has_grant("w2", "coder", "list_files"));

        let gated = h
            .coordinator
            .gate_calls("w1", "coder", "w1/coder", vec![list_files()]);
        assert!(matches!(gated[0], AgentToolCall::Direct(_)));
    }

    #[tokio::test]
    async fn persistent_denial_grants_nothing() {
        let h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        h.coordinator
            .resolve(decision(
                &approval_id,
                Decision::Deny,
                ApprovalScope::Persistent,
            ))
            .await
            .unwrap();

        assert!(!h.coordinator.has_grant("w1", "coder", "list_files"));
        let gated = h
            .coordinator
            .gate_calls("w1", "coder", "w1/coder", vec![list_files()]);
        assert!(gated[0].is_approval_request());
    }

    #[tokio::test]
    async fn ungated_tools_pass_through_directly() {
        let h = harness_with(
            RecordingExecutor::new(),
            Arc::new(RequireNamed::new(["delete_file"])),
        );

        let gated = h
            .coordinator
            .gate_calls("w1", "coder", "w1/coder", vec![list_files()]);

        assert!(matches!(gated[0], AgentToolCall::Direct(_)));
        assert_eq!(h.coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn open_approvals_snapshot_lists_held_calls() {
        let h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        let open = h.coordinator.open_approvals();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].approval_id, approval_id);
        assert_eq!(open[0].original.name, "list_files");
        assert_eq!(open[0].world_id, "w1");
    }

    #[tokio::test]
    async fn held_call_keeps_the_world_active_until_resumed() {
        let h = harness();
        let approval_id = gate_one(&h, list_files()).await;
        assert!(h.tracker.is_active("w1"));

        h.coordinator
            .resolve(decision(&approval_id, Decision::Approve, ApprovalScope::Once))
            .await
            .unwrap();

        // the slot is released by the resumed turn, not by the resolution
        assert!(h.tracker.is_active("w1"));
        h.tracker.idle("w1").unwrap();
        assert!(!h.tracker.is_active("w1"));
    }

    #[tokio::test]
    async fn concurrent_duplicate_decisions_execute_once() {
        let mut h = harness();
        let approval_id = gate_one(&h, list_files()).await;

        let coordinator = Arc::new(h.coordinator);
        let a = {
            let c = coordinator.clone();
            let d = decision(&approval_id, Decision::Approve, ApprovalScope::Once);
            tokio::spawn(async move { c.resolve(d).await })
        };
        let b = {
            let c = coordinator.clone();
            let d = decision(&approval_id, Decision::Approve, ApprovalScope::Once);
            tokio::spawn(async move { c.resolve(d).await })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(h.executor.executed().len(), 1);
        assert!(h.resume_rx.recv().await.is_some());
        assert!(h.resume_rx.try_recv().is_err());
    }
}
