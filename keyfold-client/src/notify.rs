//! State-change notification registry.
//!
//! An explicit publish/subscribe abstraction: handlers are invoked
//! synchronously, in subscription order, with the (old, new) state pair.
//! Delivery order matches transition order and no notification is dropped;
//! marshaling onto a UI thread is the subscriber's business.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Handle returned by [`StateRegistry::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<S> = Box<dyn Fn(&S, &S) + Send + Sync>;

/// Registry of state-change observers for a state type `S`.
pub struct StateRegistry<S> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<S>)>>,
}

impl<S> Default for StateRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateRegistry<S> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&S, &S) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    /// Removes a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Delivers (old, new) to every subscriber, in subscription order.
    pub fn publish(&self, old: &S, new: &S) {
        let subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        for (_, callback) in subscribers.iter() {
            callback(old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn delivers_in_subscription_order() {
        let registry = StateRegistry::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let log = log.clone();
            registry.subscribe(move |old, new| {
                log.lock().unwrap().push((tag, *old, *new));
            });
        }

        registry.publish(&1, &2);
        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec![("a", 1, 2), ("b", 1, 2), ("c", 1, 2)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = StateRegistry::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = registry.subscribe(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.publish(&0, &1);
        registry.unsubscribe(id);
        registry.publish(&1, &2);
        // Unknown id unsubscribe is a no-op.
        registry.unsubscribe(id);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
