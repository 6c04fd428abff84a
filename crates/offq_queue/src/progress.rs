use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use offq_contract::ProgressEvent;
use parking_lot::Mutex;
use tracing::warn;

type Callback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Ordered observer list for record progress.
///
/// Delivery is synchronous and in subscription order. A panicking subscriber
/// is logged and skipped; the others still run and the publisher never sees
/// the panic.
#[derive(Default)]
pub struct ProgressHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            hub: Arc::downgrade(self),
        }
    }

    pub fn publish(&self, event: &ProgressEvent) {
        // snapshot so callbacks may subscribe or unsubscribe re-entrantly
        let subscribers: Vec<(u64, Callback)> = self.subscribers.lock().clone();
        for (id, callback) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(subscriber = id, record_id = %event.id, "progress subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Handle returned by [`ProgressHub::subscribe`]. Dropping it leaves the
/// subscriber registered; call [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<ProgressHub>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use offq_contract::UploadStatus;

    use super::*;

    fn event(progress: u8) -> ProgressEvent {
        ProgressEvent {
            id: "rec-1".to_string(),
            status: UploadStatus::InFlight,
            progress,
            retry_count: 0,
            last_error: None,
            outcome: None,
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let hub = ProgressHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            let _ = hub.subscribe(move |e: &ProgressEvent| seen.lock().push((name, e.progress)));
        }
        hub.publish(&event(10));

        assert_eq!(
            *seen.lock(),
            vec![("first", 10), ("second", 10), ("third", 10)]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_rest() {
        let hub = ProgressHub::new();
        let seen = Arc::new(Mutex::new(0u32));

        let _ = hub.subscribe(|_: &ProgressEvent| panic!("subscriber bug"));
        let counter = seen.clone();
        let _ = hub.subscribe(move |_: &ProgressEvent| *counter.lock() += 1);

        hub.publish(&event(1));
        hub.publish(&event(2));
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn unsubscribe_removes_only_that_subscriber() {
        let hub = ProgressHub::new();
        let a = Arc::new(Mutex::new(0u32));
        let b = Arc::new(Mutex::new(0u32));

        let a_count = a.clone();
        let sub_a = hub.subscribe(move |_: &ProgressEvent| *a_count.lock() += 1);
        let b_count = b.clone();
        let _sub_b = hub.subscribe(move |_: &ProgressEvent| *b_count.lock() += 1);

        hub.publish(&event(0));
        sub_a.unsubscribe();
        hub.publish(&event(50));

        assert_eq!(*a.lock(), 1);
        assert_eq!(*b.lock(), 2);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
