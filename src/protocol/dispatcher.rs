//! Callback tables and event listeners.
//!
//! A [`CallbackTable`] maps a 32-bit data identifier to a set of callbacks.
//! Each registration returns a [`CallbackId`] handle used to unregister it.
//! Registering the same callback (the same `Arc`) twice under one key is a
//! no-op that returns the original handle, so a message is never delivered
//! twice to one callback. Dispatch order among callbacks under a key is
//! unspecified.
//!
//! Callbacks are cloned out of the table before they run, so a callback may
//! register or unregister others, or send through its session manager,
//! without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::utils::sync::{read_lock, write_lock};

/// Handle returned by a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Shared callback invoked with a borrowed argument
pub type Callback<A> = Arc<dyn Fn(&A) + Send + Sync + 'static>;

struct Entry<A: ?Sized> {
    id: CallbackId,
    /// Address of the user-supplied callback
    identity: usize,
    callback: Callback<A>,
}

impl<A: ?Sized> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            identity: self.identity,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Address identifying an `Arc`'d callback, independent of its vtable
pub fn callback_identity<T: ?Sized>(callback: &Arc<T>) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

/// Callbacks keyed by data identifier
pub struct CallbackTable<A: ?Sized> {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<u32, Vec<Entry<A>>>>,
}

impl<A: ?Sized> Default for CallbackTable<A> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<A: ?Sized> fmt::Debug for CallbackTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("keys", &read_lock(&self.handlers).len())
            .finish()
    }
}

impl<A: ?Sized> CallbackTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `key`.
    pub fn register(&self, key: u32, callback: Callback<A>) -> CallbackId {
        let identity = callback_identity(&callback);
        self.register_with_identity(key, identity, callback)
    }

    /// Register a wrapper whose identity is that of the callback it wraps.
    pub fn register_with_identity(
        &self,
        key: u32,
        identity: usize,
        callback: Callback<A>,
    ) -> CallbackId {
        let mut handlers = write_lock(&self.handlers);
        let entries = handlers.entry(key).or_default();
        if let Some(existing) = entries.iter().find(|e| e.identity == identity) {
            return existing.id;
        }

        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Entry {
            id,
            identity,
            callback,
        });
        id
    }

    /// Remove a registration. Unknown handles are ignored.
    pub fn unregister(&self, key: u32, id: CallbackId) -> bool {
        let mut handlers = write_lock(&self.handlers);
        let Some(entries) = handlers.get_mut(&key) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.remove(&key);
        }
        removed
    }

    /// Invoke every callback under `key`. Returns how many ran.
    pub fn dispatch(&self, key: u32, arg: &A) -> usize {
        let entries: Vec<Entry<A>> = match read_lock(&self.handlers).get(&key) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        for entry in &entries {
            (entry.callback)(arg);
        }
        entries.len()
    }

    /// Whether any callback is registered under `key`
    pub fn contains(&self, key: u32) -> bool {
        read_lock(&self.handlers).contains_key(&key)
    }
}

/// Handle returned by [`EventListeners::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscribers to a session manager's lifecycle notifications
pub struct EventListeners<E> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Fn(&E) + Send + Sync + 'static>)>>,
}

impl<E> Default for EventListeners<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("listeners", &read_lock(&self.listeners).len())
            .finish()
    }
}

impl<E> EventListeners<E> {
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write_lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = write_lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver `event` to every subscriber in subscription order.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<_> = read_lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
