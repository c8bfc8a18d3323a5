//! Stream completion control.
//!
//! A `WorldStream` sits between the bus and one outward channel (an SSE
//! response or a WebSocket). It forwards the world's events and watches the
//! activity transitions to decide when the channel is done: the first
//! `response-start` arms it, the matching `idle` starts a short grace drain
//! for same-tick stragglers, then the stream closes. Two fallbacks guard
//! against producers that crash mid-turn: a no-events timeout for streams
//! that never see any traffic, and an absolute ceiling for turns that never
//! reach idle. Closing releases the bus subscription and is idempotent.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agora_types::config::StreamConfig;
use agora_types::event::{ActivityPhase, EventPayload, WorldEvent};

use crate::event::{EventBus, Subscription};

/// Why a stream closed. Delivered to the adapter as a normal final item,
/// never as an error: from the client's perspective the response is simply
/// finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// The watched turn completed and the grace drain elapsed.
    IdleComplete,
    /// No events at all arrived within the no-events timeout.
    NoEvents,
    /// The absolute ceiling elapsed without the turn reaching idle.
    MaxDuration,
    /// The adapter's close hook fired (client went away).
    ClientDisconnect,
}

/// One item delivered to the adapter: a forwarded event, or the final
/// close marker. Nothing follows `Closed`.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(WorldEvent),
    Closed(CloseReason),
}

/// Close hook handed to the delivery adapter. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct StreamCloser {
    token: CancellationToken,
}

impl StreamCloser {
    pub fn close(&self) {
        self.token.cancel();
    }
}

/// A completion-controlled subscription to one world topic.
pub struct WorldStream {
    items: mpsc::Receiver<StreamItem>,
    closer: StreamCloser,
}

impl WorldStream {
    /// Subscribe to `topic` and spawn the completion watcher.
    ///
    /// The subscription is registered before this returns, so no event
    /// published afterwards can be missed.
    pub fn open(bus: &EventBus, topic: &str, config: &StreamConfig) -> Self {
        let (subscription, events) = bus.subscribe_channel(topic);
        let (tx, items) = mpsc::channel(256);
        let token = CancellationToken::new();

        let watcher = CompletionWatcher {
            topic: topic.to_string(),
            subscription,
            events,
            out: tx,
            token: token.clone(),
            config: config.clone(),
        };
        tokio::spawn(watcher.run());

        Self {
            items,
            closer: StreamCloser { token },
        }
    }

    /// Next forwarded event or the final close marker.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.items.recv().await
    }

    /// Hook for the adapter to close on client disconnect.
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }
}

/// Dropping the stream closes it, so an adapter that goes away mid-turn
/// releases its bus subscription without an explicit close call.
impl Drop for WorldStream {
    fn drop(&mut self) {
        self.closer.close();
    }
}

struct CompletionWatcher {
    topic: String,
    subscription: Subscription,
    events: mpsc::Receiver<WorldEvent>,
    out: mpsc::Sender<StreamItem>,
    token: CancellationToken,
    config: StreamConfig,
}

impl CompletionWatcher {
    async fn run(mut self) {
        let opened = Instant::now();
        let no_events_deadline = opened + self.config.no_events_timeout();
        let ceiling = opened + self.config.max_duration();

        let mut awaiting_idle: Option<Uuid> = None;
        let mut saw_event = false;

        let reason = loop {
            tokio::select! {
                _ = self.token.cancelled() => break CloseReason::ClientDisconnect,
                _ = sleep_until(ceiling) => break CloseReason::MaxDuration,
                _ = sleep_until(no_events_deadline), if !saw_event => {
                    break CloseReason::NoEvents;
                }
                maybe = self.events.recv() => {
                    let Some(event) = maybe else {
                        // bus side gone; nothing more will arrive
                        break CloseReason::ClientDisconnect;
                    };
                    saw_event = true;
                    let completed = self.turn_completed(&event, &mut awaiting_idle);
                    if self.out.send(StreamItem::Event(event)).await.is_err() {
                        break CloseReason::ClientDisconnect;
                    }
                    if completed {
                        if let Some(reason) = self.grace_drain().await {
                            break reason;
                        }
                        break CloseReason::IdleComplete;
                    }
                }
            }
        };

        // release the bus subscription before announcing the close
        self.subscription.unsubscribe();
        tracing::debug!(topic = %self.topic, ?reason, "stream closed");
        let _ = self.out.send(StreamItem::Closed(reason)).await;
    }

    /// Track activity transitions. The first `response-start` arms the
    /// watcher; only the `idle` carrying the same activity id completes it.
    fn turn_completed(&self, event: &WorldEvent, awaiting_idle: &mut Option<Uuid>) -> bool {
        let EventPayload::WorldActivity {
            phase, activity_id, ..
        } = &event.payload
        else {
            return false;
        };
        match phase {
            ActivityPhase::ResponseStart => {
                if awaiting_idle.is_none() {
                    *awaiting_idle = Some(*activity_id);
                    tracing::trace!(topic = %self.topic, %activity_id, "awaiting idle");
                }
                false
            }
            ActivityPhase::Idle => *awaiting_idle == Some(*activity_id),
        }
    }

    /// Forward stragglers that land within the grace window after idle.
    /// Returns Some when the drain was interrupted by a disconnect.
    async fn grace_drain(&mut self) -> Option<CloseReason> {
        let deadline = Instant::now() + self.config.grace();
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return Some(CloseReason::ClientDisconnect),
                _ = sleep_until(deadline) => return None,
                maybe = self.events.recv() => {
                    let Some(event) = maybe else {
                        return None;
                    };
                    if self.out.send(StreamItem::Event(event)).await.is_err() {
                        return Some(CloseReason::ClientDisconnect);
                    }
                }
            }
        }
    }
}
