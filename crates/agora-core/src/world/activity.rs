//! World activity tracking.
//!
//! Each world carries a counter of pending response-producing operations and
//! the id of the turn in progress. The two entry points here are the only
//! code allowed to mutate that counter. A turn is bounded by one published
//! `response-start`/`idle` pair sharing an activity id; nested starts while
//! a turn is open increment the counter without minting a new id or
//! publishing again.

use dashmap::DashMap;
use uuid::Uuid;

use agora_types::error::ValidationError;
use agora_types::event::{ActivityPhase, EventPayload, WorldEvent};

use crate::event::EventBus;

struct ActivityState {
    pending: u32,
    activity_id: Uuid,
    source: Option<String>,
}

enum StartTransition {
    Started(Uuid),
    Nested(Uuid, u32),
}

enum IdleTransition {
    Completed { activity_id: Uuid, source: Option<String> },
    StillActive(u32),
    Spurious,
}

/// Tracks activity per world and publishes transition events on the world's
/// topic. Created lazily per world; state lives for the process lifetime.
pub struct ActivityTracker {
    bus: EventBus,
    worlds: DashMap<String, ActivityState>,
}

impl ActivityTracker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            worlds: DashMap::new(),
        }
    }

    /// A producer has begun generating output for `world_id`.
    ///
    /// On the idle-to-active transition this mints a new activity id and
    /// publishes a `response-start` world-activity event; while already
    /// active it only increments the pending counter. Returns the id of the
    /// turn in progress.
    pub fn response_start(
        &self,
        world_id: &str,
        source: Option<&str>,
    ) -> Result<Uuid, ValidationError> {
        let transition = {
            let mut state = self.worlds.entry(world_id.to_string()).or_insert(ActivityState {
                pending: 0,
                activity_id: Uuid::nil(),
                source: None,
            });
            if state.pending == 0 {
                state.pending = 1;
                state.activity_id = Uuid::now_v7();
                state.source = source.map(str::to_string);
                StartTransition::Started(state.activity_id)
            } else {
                state.pending += 1;
                StartTransition::Nested(state.activity_id, state.pending)
            }
        };

        match transition {
            StartTransition::Started(activity_id) => {
                tracing::debug!(world_id, %activity_id, "world active");
                self.bus.publish(
                    world_id,
                    EventPayload::WorldActivity {
                        world_id: world_id.to_string(),
                        phase: ActivityPhase::ResponseStart,
                        activity_id,
                        source: source.map(str::to_string),
                    },
                )?;
                Ok(activity_id)
            }
            StartTransition::Nested(activity_id, pending) => {
                tracing::trace!(world_id, %activity_id, pending, "nested response start");
                Ok(activity_id)
            }
        }
    }

    /// A producer has finished generating output for `world_id`.
    ///
    /// When the pending counter reaches zero the world returns to idle and
    /// an `idle` world-activity event is published carrying the same
    /// activity id that started the turn; the event is returned. An `idle`
    /// with nothing pending is logged and ignored.
    pub fn idle(&self, world_id: &str) -> Result<Option<WorldEvent>, ValidationError> {
        let transition = match self.worlds.get_mut(world_id) {
            None => IdleTransition::Spurious,
            Some(mut state) => {
                if state.pending == 0 {
                    IdleTransition::Spurious
                } else {
                    state.pending -= 1;
                    if state.pending == 0 {
                        IdleTransition::Completed {
                            activity_id: state.activity_id,
                            source: state.source.clone(),
                        }
                    } else {
                        IdleTransition::StillActive(state.pending)
                    }
                }
            }
        };

        match transition {
            IdleTransition::Completed {
                activity_id,
                source,
            } => {
                tracing::debug!(world_id, %activity_id, "world idle");
                let event = self.bus.publish(
                    world_id,
                    EventPayload::WorldActivity {
                        world_id: world_id.to_string(),
                        phase: ActivityPhase::Idle,
                        activity_id,
                        source,
                    },
                )?;
                Ok(Some(event))
            }
            IdleTransition::StillActive(pending) => {
                tracing::trace!(world_id, pending, "world still active");
                Ok(None)
            }
            IdleTransition::Spurious => {
                tracing::warn!(world_id, "idle signal with no pending activity, ignoring");
                Ok(None)
            }
        }
    }

    /// Whether a turn is in progress for `world_id`.
    pub fn is_active(&self, world_id: &str) -> bool {
        self.worlds
            .get(world_id)
            .map(|state| state.pending > 0)
            .unwrap_or(false)
    }

    /// Id of the turn in progress, if any.
    pub fn current_activity(&self, world_id: &str) -> Option<Uuid> {
        self.worlds
            .get(world_id)
            .filter(|state| state.pending > 0)
            .map(|state| state.activity_id)
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("worlds", &self.worlds.len())
            .finish()
    }
}
