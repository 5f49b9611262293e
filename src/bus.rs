//! Notification Bus — spec §4.I.
//!
//! Generic fire-and-forget pub/sub: publishing snapshots the subscriber list
//! so a callback that subscribes or unsubscribes doesn't deadlock against the
//! publish it's reacting to. Delivery is synchronous and best-effort — a
//! panicking callback is not caught, callers should keep callbacks simple.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub type SubscriptionId = u64;

pub struct NotificationBus<E> {
    subscribers: Mutex<HashMap<SubscriptionId, Box<dyn Fn(&E) + Send + Sync>>>,
    next_id: AtomicU64,
}

impl<E> Default for NotificationBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> NotificationBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("bus subscribers mutex poisoned")
            .insert(id, Box::new(callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("bus subscribers mutex poisoned")
            .remove(&id);
    }

    /// Delivers `event` to every current subscriber, in arbitrary order.
    /// A subscriber that subscribes or unsubscribes from inside its own
    /// callback will deadlock — callbacks must not touch the bus they're on.
    pub fn publish(&self, event: E) {
        let guard = self.subscribers.lock().expect("bus subscribers mutex poisoned");
        for callback in guard.values() {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus subscribers mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus: NotificationBus<u32> = NotificationBus::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = total.clone();
        bus.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::Relaxed);
        });
        let t2 = total.clone();
        bus.subscribe(move |v| {
            t2.fetch_add(*v as usize, Ordering::Relaxed);
        });

        bus.publish(5);
        assert_eq!(total.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus: NotificationBus<u32> = NotificationBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(1);
        bus.unsubscribe(id);
        bus.publish(1);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn subscriber_count_reflects_active_subscriptions() {
        let bus: NotificationBus<u32> = NotificationBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let id = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
