// SPDX-License-Identifier: MIT
//! Id-keyed subscriber registries.
//!
//! Every event surface in this crate (channel messages, channel errors,
//! channel close, transport state changes, diagnostics) hands out a
//! [`Subscription`] on registration. Disposing the subscription removes
//! exactly that handler; disposing twice is a no-op. Clearing the registry
//! (owner close/dispose) drops every handler at once — nothing fires after a
//! clear.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Run one subscriber callback, containing a panic so sibling handlers in
/// the same dispatch still fire and the dispatching task survives.
pub(crate) fn dispatch_contained(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("subscriber panicked — siblings still delivered");
    }
}

/// A set of handlers keyed by registration id.
///
/// Handlers are stored as `Arc<T>` so dispatch can snapshot the current set
/// and invoke it without holding the lock — a handler that disposes its own
/// (or a sibling's) subscription mid-dispatch cannot deadlock.
pub struct Registry<T: ?Sized> {
    entries: Arc<Mutex<BTreeMap<u64, Arc<T>>>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler and return its disposable subscription.
    pub fn insert(&self, handler: Arc<T>) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .insert(id, handler);
        Subscription {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Snapshot the current handlers in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Drop every handler. Subscriptions handed out earlier become inert.
    pub fn clear(&self) {
        self.entries.lock().expect("registry lock poisoned").clear();
    }

    /// Drop every handler and return them, in registration order. Used by
    /// close paths that must fire close handlers exactly once *after*
    /// detaching the registries.
    pub fn take_all(&self) -> Vec<Arc<T>> {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        std::mem::take(&mut *entries).into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().expect("registry lock poisoned").is_empty()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one registered handler. `dispose()` removes exactly that
/// handler; calling it again (or after the registry was cleared) is a no-op.
pub struct Subscription<T: ?Sized> {
    id: u64,
    entries: Weak<Mutex<BTreeMap<u64, Arc<T>>>>,
}

impl<T: ?Sized> Subscription<T> {
    pub fn dispose(&self) {
        if let Some(entries) = self.entries.upgrade() {
            entries.lock().expect("registry lock poisoned").remove(&self.id);
        }
    }
}
