//! Event bus for cross-component communication.
//!
//! Provides a publish-subscribe system for lifecycle events so the scheduler,
//! enrichment queue and draft lifecycle stay loosely coupled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::AuthState;
use crate::domain::{DraftState, EmailId};
use crate::services::SyncTrigger;

/// Domain events for cross-component communication.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    // Session events
    /// The session moved between lifecycle states.
    AuthStateChanged { from: AuthState, to: AuthState },

    // Sync events
    /// A sync cycle started.
    SyncStarted { trigger: SyncTrigger },
    /// A sync cycle published a new snapshot.
    SnapshotReplaced { count: usize },
    /// A sync cycle failed; the previous snapshot is still current.
    SyncFailed { error: String },

    // Enrichment events
    /// An insight was stored for a message.
    InsightReady { email_id: EmailId },
    /// Enrichment failed for a message.
    InsightFailed { email_id: EmailId, error: String },

    // Mailbox events
    /// A message was archived.
    MessageArchived(EmailId),
    /// A message was moved to trash.
    MessageTrashed(EmailId),

    // Draft events
    /// A reply draft changed state.
    DraftStateChanged {
        email_id: EmailId,
        state: DraftState,
    },
    /// A reply was sent.
    ReplySent { email_id: EmailId },
}

/// Subscriber ID for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Event handler function type.
pub type EventHandler = Box<dyn Fn(&AppEvent) + Send + Sync>;

/// Event bus for publish-subscribe communication.
///
/// Handlers run synchronously on the publishing task, so they must be quick
/// (typically a notify or a channel send). Thread-safe for use across async
/// boundaries. Clones share subscribers.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<u64, EventHandler>>>,
    next_id: Arc<Mutex<u64>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Subscribe to all events.
    ///
    /// Returns a subscriber ID that can be used to unsubscribe.
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next_id = lock(&self.next_id);
            let id = *next_id;
            *next_id += 1;
            id
        };

        lock(&self.handlers).insert(id, Box::new(handler));
        SubscriberId(id)
    }

    /// Unsubscribe from events.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        lock(&self.handlers).remove(&subscriber_id.0);
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AppEvent) {
        tracing::trace!(?event, "publish");
        let handlers = lock(&self.handlers);
        for handler in handlers.values() {
            handler(&event);
        }
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.handlers).len()
    }
}

// A panicking handler must not take the bus down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
