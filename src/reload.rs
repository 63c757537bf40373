//! Reload registry — subscriptions and the pending-reload set.
//!
//! DESIGN
//! ======
//! Consumers subscribe a callback per application key and keep the returned
//! [`Subscription`]; dropping it unsubscribes. Marking a key pending records
//! that its cached settings are stale. `drain` takes the whole pending set in
//! one critical section, then runs callbacks with no lock held so a callback
//! can schedule further reloads or issue settings requests.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::error::GuardError;

/// Reload callback. Receives the application key being reloaded.
pub type ReloadCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, ReloadCallback)>>,
    /// Ordered so drains visit keys deterministically.
    pending: BTreeSet<String>,
}

/// Outcome of one drain of the pending-reload set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Keys whose subscribers were notified.
    pub notified: Vec<String>,
    /// Keys that were pending but had lost every subscriber by drain time.
    pub unclaimed: Vec<String>,
    /// Total callbacks invoked.
    pub callbacks: usize,
}

impl DrainReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notified.is_empty() && self.unclaimed.is_empty()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Clone, Default)]
pub struct ReloadRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl ReloadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `app`. Callbacks for one key run in
    /// registration order.
    pub fn subscribe<F>(&self, app: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let app = app.into();
        let callback: ReloadCallback = Arc::new(callback);
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state
            .subscribers
            .entry(app.clone())
            .or_default()
            .push((id, callback));
        debug!(%app, id, "reload subscriber registered");
        Subscription { registry: Arc::downgrade(&self.inner), app, id }
    }

    #[must_use]
    pub fn has_subscribers(&self, app: &str) -> bool {
        self.state().subscribers.contains_key(app)
    }

    #[must_use]
    pub fn is_pending(&self, app: &str) -> bool {
        self.state().pending.contains(app)
    }

    /// Currently pending keys, in drain order.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.state().pending.iter().cloned().collect()
    }

    /// Flag `app` for reload. Marking an already-pending key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::NoSubscribers` when nobody listens for `app`.
    pub fn mark_pending(&self, app: &str) -> Result<(), GuardError> {
        let mut state = self.state();
        if !state.subscribers.contains_key(app) {
            return Err(GuardError::NoSubscribers { app: app.to_string() });
        }
        state.pending.insert(app.to_string());
        Ok(())
    }

    /// Clear the pending set and notify each key's subscribers exactly once.
    pub fn drain(&self) -> DrainReport {
        let batch: Vec<(String, Vec<ReloadCallback>)> = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .map(|app| {
                    let callbacks: Vec<ReloadCallback> = state
                        .subscribers
                        .get(&app)
                        .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                        .unwrap_or_default();
                    (app, callbacks)
                })
                .collect()
        };

        let mut report = DrainReport::default();
        for (app, callbacks) in batch {
            if callbacks.is_empty() {
                debug!(%app, "pending reload dropped: no subscribers left");
                report.unclaimed.push(app);
                continue;
            }
            for callback in &callbacks {
                callback(&app);
            }
            debug!(%app, callbacks = callbacks.len(), "reload delivered");
            report.callbacks += callbacks.len();
            report.notified.push(app);
        }
        report
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        lock_state(&self.inner)
    }
}

impl fmt::Debug for ReloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ReloadRegistry")
            .field("apps", &state.subscribers.len())
            .field("pending", &state.pending)
            .finish()
    }
}

fn lock_state(inner: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle to one registered reload callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    registry: Weak<Mutex<RegistryState>>,
    app: String,
    id: u64,
}

impl Subscription {
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        // Callbacks are dropped after the registry lock is released.
        let removed: Vec<(u64, ReloadCallback)> = {
            let mut state = lock_state(&inner);
            let Some(subs) = state.subscribers.get_mut(&self.app) else {
                return;
            };
            let (removed, kept) = std::mem::take(subs)
                .into_iter()
                .partition(|(id, _)| *id == self.id);
            *subs = kept;
            if subs.is_empty() {
                state.subscribers.remove(&self.app);
            }
            removed
        };
        drop(removed);
        debug!(app = %self.app, id = self.id, "reload subscriber removed");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("app", &self.app)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
#[path = "reload_test.rs"]
mod tests;
