//! In-process publish/subscribe router for world events.
//!
//! Each `EventBus` is an explicit, constructible instance -- one per world in
//! the server deployment -- so worlds and test instances stay isolated.
//! Publishing validates the payload, stamps id and timestamp, records the
//! event in bounded history, then notifies subscribers synchronously in
//! registration order: topic subscribers first, then global subscribers,
//! then per-agent subscribers when the payload carries an agent id.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::mpsc;

use agora_types::error::ValidationError;
use agora_types::event::{BusStats, EventFilter, EventKind, EventPayload, WorldEvent};

use super::subscription::{Subscription, SubscriberTarget};

/// Default bounded history size. Oldest entries drop first past this.
pub const DEFAULT_HISTORY_CAPACITY: usize = 5000;

/// Buffer for channel-backed subscribers (transports). A full buffer drops
/// events for that subscriber rather than blocking the publish path.
const CHANNEL_BUFFER: usize = 1024;

pub(crate) type EventHandler = dyn Fn(&WorldEvent) + Send + Sync;

pub(crate) struct HandlerEntry {
    id: u64,
    handler: Arc<EventHandler>,
}

struct HistoryState {
    events: VecDeque<WorldEvent>,
    total_events: u64,
    events_by_kind: HashMap<EventKind, u64>,
}

pub(crate) struct BusShared {
    history_capacity: usize,
    topic_handlers: DashMap<String, Vec<HandlerEntry>>,
    agent_handlers: DashMap<String, Vec<HandlerEntry>>,
    global_handlers: Mutex<Vec<HandlerEntry>>,
    history: Mutex<HistoryState>,
    next_handler_id: AtomicU64,
}

/// Recover the guard even if a handler panicked while holding the lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BusShared {
    fn next_id(&self) -> u64 {
        self.next_handler_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, target: &SubscriberTarget, entry: HandlerEntry) {
        match target {
            SubscriberTarget::Topic(topic) => {
                self.topic_handlers.entry(topic.clone()).or_default().push(entry);
            }
            SubscriberTarget::Agent(agent_id) => {
                self.agent_handlers.entry(agent_id.clone()).or_default().push(entry);
            }
            SubscriberTarget::Global => {
                lock(&self.global_handlers).push(entry);
            }
        }
    }

    pub(crate) fn remove(&self, target: &SubscriberTarget, id: u64) {
        match target {
            SubscriberTarget::Topic(topic) => {
                if let Some(mut entries) = self.topic_handlers.get_mut(topic) {
                    entries.retain(|e| e.id != id);
                    if entries.is_empty() {
                        drop(entries);
                        self.topic_handlers.remove_if(topic, |_, v| v.is_empty());
                    }
                }
            }
            SubscriberTarget::Agent(agent_id) => {
                if let Some(mut entries) = self.agent_handlers.get_mut(agent_id) {
                    entries.retain(|e| e.id != id);
                    if entries.is_empty() {
                        drop(entries);
                        self.agent_handlers.remove_if(agent_id, |_, v| v.is_empty());
                    }
                }
            }
            SubscriberTarget::Global => {
                lock(&self.global_handlers).retain(|e| e.id != id);
            }
        }
    }

    /// Snapshot the handlers a publish must notify, in dispatch order.
    /// Guards are released before any handler runs, so handlers may freely
    /// subscribe, unsubscribe, or publish again.
    fn handlers_for(&self, topic: &str, agent_id: Option<&str>) -> Vec<Arc<EventHandler>> {
        let mut out = Vec::new();
        if let Some(entries) = self.topic_handlers.get(topic) {
            out.extend(entries.iter().map(|e| Arc::clone(&e.handler)));
        }
        out.extend(lock(&self.global_handlers).iter().map(|e| Arc::clone(&e.handler)));
        if let Some(agent_id) = agent_id
            && let Some(entries) = self.agent_handlers.get(agent_id)
        {
            out.extend(entries.iter().map(|e| Arc::clone(&e.handler)));
        }
        out
    }

    fn subscription_count(&self) -> usize {
        let topics: usize = self.topic_handlers.iter().map(|e| e.value().len()).sum();
        let agents: usize = self.agent_handlers.iter().map(|e| e.value().len()).sum();
        topics + agents + lock(&self.global_handlers).len()
    }
}

/// Publish/subscribe router for one world's events.
///
/// Cloning shares the underlying registries and history, allowing multiple
/// producers and consumers.
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus whose history holds at most `history_capacity` events.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            shared: Arc::new(BusShared {
                history_capacity,
                topic_handlers: DashMap::new(),
                agent_handlers: DashMap::new(),
                global_handlers: Mutex::new(Vec::new()),
                history: Mutex::new(HistoryState {
                    events: VecDeque::new(),
                    total_events: 0,
                    events_by_kind: HashMap::new(),
                }),
                next_handler_id: AtomicU64::new(0),
            }),
        }
    }

    /// Validate, stamp, record, and dispatch a payload on `topic`.
    ///
    /// An invalid payload is rejected before anything is recorded or any
    /// subscriber runs. Handlers are invoked synchronously, each running to
    /// completion before the next; the stamped event is returned to the
    /// caller.
    pub fn publish(
        &self,
        topic: &str,
        payload: EventPayload,
    ) -> Result<WorldEvent, ValidationError> {
        payload.validate()?;
        let event = WorldEvent::new(payload);

        {
            let mut history = lock(&self.shared.history);
            history.total_events += 1;
            *history
                .events_by_kind
                .entry(event.payload.kind())
                .or_insert(0) += 1;
            history.events.push_back(event.clone());
            while history.events.len() > self.shared.history_capacity {
                history.events.pop_front();
            }
        }

        tracing::trace!(
            topic,
            kind = %event.payload.kind(),
            event_id = %event.id,
            "event published"
        );

        for handler in self
            .shared
            .handlers_for(topic, event.payload.agent_id())
        {
            handler(&event);
        }

        Ok(event)
    }

    /// Register a handler for every event published on `topic`.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&WorldEvent) + Send + Sync + 'static,
    {
        self.register(SubscriberTarget::Topic(topic.to_string()), handler)
    }

    /// Register a handler for every event whose payload carries `agent_id`,
    /// regardless of topic.
    pub fn subscribe_to_agent<F>(&self, agent_id: &str, handler: F) -> Subscription
    where
        F: Fn(&WorldEvent) + Send + Sync + 'static,
    {
        self.register(SubscriberTarget::Agent(agent_id.to_string()), handler)
    }

    /// Register a handler for every event on every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WorldEvent) + Send + Sync + 'static,
    {
        self.register(SubscriberTarget::Global, handler)
    }

    fn register<F>(&self, target: SubscriberTarget, handler: F) -> Subscription
    where
        F: Fn(&WorldEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_id();
        self.shared.insert(
            &target,
            HandlerEntry {
                id,
                handler: Arc::new(handler),
            },
        );
        Subscription::new(Arc::clone(&self.shared), target, id)
    }

    /// Topic subscription bridged onto an mpsc channel, for transports that
    /// consume events from an async task. Events beyond the buffer are
    /// dropped for that subscriber with a warning.
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> (Subscription, mpsc::Receiver<WorldEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let topic_name = topic.to_string();
        let subscription = self.subscribe(topic, move |event| {
            forward(&tx, &topic_name, event);
        });
        (subscription, rx)
    }

    /// Global subscription bridged onto an mpsc channel.
    pub fn subscribe_all_channel(&self) -> (Subscription, mpsc::Receiver<WorldEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let subscription = self.subscribe_all(move |event| {
            forward(&tx, "*", event);
        });
        (subscription, rx)
    }

    /// Snapshot of recorded events, oldest first.
    ///
    /// The kind/agent/since clauses select events; `limit` is applied last
    /// and keeps the most recent matches.
    pub fn history(&self, filter: Option<&EventFilter>) -> Vec<WorldEvent> {
        let state = lock(&self.shared.history);
        let mut events: Vec<WorldEvent> = match filter {
            Some(f) => state.events.iter().filter(|e| f.matches(e)).cloned().collect(),
            None => state.events.iter().cloned().collect(),
        };
        if let Some(limit) = filter.and_then(|f| f.limit)
            && events.len() > limit
        {
            let excess = events.len() - limit;
            events.drain(..excess);
        }
        events
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> BusStats {
        let state = lock(&self.shared.history);
        BusStats {
            total_events: state.total_events,
            events_by_kind: state.events_by_kind.clone(),
            history_size: state.events.len(),
            active_subscriptions: self.shared.subscription_count(),
        }
    }
}

fn forward(tx: &mpsc::Sender<WorldEvent>, topic: &str, event: &WorldEvent) {
    match tx.try_send(event.clone()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(topic, "subscriber channel full, dropping event");
        }
        // Receiver side already gone; the guard will clean up shortly.
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.history);
        f.debug_struct("EventBus")
            .field("history_size", &state.events.len())
            .field("total_events", &state.total_events)
            .field("subscriptions", &self.shared.subscription_count())
            .finish()
    }
}
