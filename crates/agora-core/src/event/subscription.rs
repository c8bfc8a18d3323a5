//! Subscription guards for the event bus.
//!
//! A `Subscription` owns one registered handler. Releasing it -- explicitly
//! or by drop -- removes the handler before the next dispatch. Repeated
//! release is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::bus::BusShared;

/// Where a handler is registered.
#[derive(Debug, Clone)]
pub(crate) enum SubscriberTarget {
    Topic(String),
    Agent(String),
    Global,
}

/// Owned handle to one registered handler.
///
/// The registration lives until `unsubscribe()` is called or the guard is
/// dropped, whichever comes first.
pub struct Subscription {
    shared: Arc<BusShared>,
    target: SubscriberTarget,
    id: u64,
    released: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<BusShared>, target: SubscriberTarget, id: u64) -> Self {
        Self {
            shared,
            target,
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Remove the handler. Takes effect before the next dispatch; calling
    /// again (or dropping afterwards) does nothing.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.remove(&self.target, self.id);
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
