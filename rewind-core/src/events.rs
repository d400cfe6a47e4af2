/*!
Store change notifications.

Listeners are plain closures invoked synchronously after a write succeeds. A
listener that panics is logged and skipped; it never fails the write or stops
the remaining listeners from running.
*/

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::error;

/// Change notification emitted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Saved { execution_id: String },
    Deleted { execution_id: String },
    Updated { execution_id: String, node_id: String },
    Cleaned { count: usize },
}

impl StoreEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::Saved { .. } => "snapshot:saved",
            StoreEvent::Deleted { .. } => "snapshot:deleted",
            StoreEvent::Updated { .. } => "snapshot:updated",
            StoreEvent::Cleaned { .. } => "snapshots:cleaned",
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            StoreEvent::Saved { execution_id }
            | StoreEvent::Deleted { execution_id }
            | StoreEvent::Updated { execution_id, .. } => Some(execution_id),
            StoreEvent::Cleaned { .. } => None,
        }
    }
}

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Ordered set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `event` to every listener in registration order
    pub fn emit(&self, event: &StoreEvent) {
        // Snapshot the list so listeners may unsubscribe while being called.
        let listeners: Vec<(u64, Listener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(listener = id, event = event.kind(), "Store event listener panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle returned by [`ListenerRegistry::subscribe`]
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
