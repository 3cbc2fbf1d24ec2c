//! Notification subscribers
//!
//! A handler returns `true` to stay subscribed and `false` to unsubscribe.

use parking_lot::Mutex;
use std::sync::Arc;

type Handler<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Handlers<T> {
    next_id: u64,
    entries: Vec<(u64, Handler<T>)>,
}

pub struct Subscriber<T> {
    handlers: Mutex<Handlers<T>>,
}

impl<T> Default for Subscriber<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Handlers {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl<T> Subscriber<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock();
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers.entries.push((id, Arc::new(handler)));
    }

    /// Call every handler with `event`.
    ///
    /// Handlers run on a snapshot taken under the lock and are called with
    /// the lock released, so they may subscribe, relay or call back into
    /// the chain. Handlers added meanwhile first see the next event.
    pub fn relay(&self, event: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.handlers.lock().entries.clone();

        let finished: Vec<u64> = snapshot
            .into_iter()
            .filter(|(_, handler)| !handler(event))
            .map(|(id, _)| id)
            .collect();

        if !finished.is_empty() {
            self.handlers
                .lock()
                .entries
                .retain(|(id, _)| !finished.contains(id));
        }
    }
}
