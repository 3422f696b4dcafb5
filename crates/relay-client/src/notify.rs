//! Listener registries for client notifications.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nostr_core::Event;

/// Handle returned by [`Listeners::add`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback type for listeners.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered fan-out to registered callbacks.
pub struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback. Callbacks run in registration order.
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a callback. Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every callback with `value`.
    ///
    /// Runs against a snapshot, so callbacks may add or remove listeners.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener<T>)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

/// Verified events delivered for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsReceived {
    pub subscription_id: String,
    pub events: Vec<Event>,
}

/// All notification kinds a client raises.
#[derive(Debug, Default)]
pub struct Notifications {
    /// Every decoded text message, before parsing.
    pub raw_message: Listeners<String>,
    /// NOTICE messages.
    pub notice: Listeners<String>,
    /// Verified EVENT messages.
    pub events: Listeners<EventsReceived>,
    /// EOSE messages, carrying the subscription id.
    pub end_of_stored_events: Listeners<String>,
}
