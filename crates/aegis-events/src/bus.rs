//! In-process publish/subscribe fabric.
//!
//! Dispatchers publish [`EventEnvelope`]s; collaborators subscribe with a
//! server/kind filter and a bounded queue.  A slow subscriber never stalls a
//! publisher: when its queue is full the oldest entry is discarded and the
//! subscription's drop counter is incremented.  Delivery order per publisher
//! is publication order, modulo those drops.

use crate::{Event, EventEnvelope, EventKind};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Subscription filter
// ---------------------------------------------------------------------------

/// What a subscriber wants to receive.
///
/// `None` means "any" for both dimensions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    servers: Option<HashSet<Uuid>>,
    kinds: Option<HashSet<EventKind>>,
    capacity: Option<usize>,
}

impl SubscriptionFilter {
    /// Wildcard filter: every event from every server.
    pub fn all() -> Self {
        SubscriptionFilter::default()
    }

    /// Restrict to one server (may be called repeatedly to widen the set).
    #[must_use]
    pub fn server(mut self, id: Uuid) -> Self {
        self.servers.get_or_insert_with(HashSet::new).insert(id);
        self
    }

    /// Restrict to one event kind (may be called repeatedly).
    #[must_use]
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    /// Override the bus-wide default queue capacity for this subscriber.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    fn matches(&self, server_id: Uuid, event: &Event) -> bool {
        if let Some(servers) = &self.servers {
            if !servers.contains(&server_id) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Subscriber state
// ---------------------------------------------------------------------------

struct SubscriberShared {
    queue: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
    drops: AtomicU64,
    cancelled: AtomicBool,
    capacity: usize,
}

struct SubscriberEntry {
    id: u64,
    filter: SubscriptionFilter,
    shared: Arc<SubscriberShared>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

struct BusInner {
    subscribers: RwLock<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
    default_capacity: usize,
}

/// The process-wide event bus.  Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_SUBSCRIBER_QUEUE)
    }
}

impl EventBus {
    /// Create a bus with the given default per-subscriber queue capacity.
    pub fn new(default_capacity: usize) -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                default_capacity: default_capacity.max(1),
            }),
        }
    }

    /// Register a subscriber.  The returned handle is the only reader side.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let capacity = filter.capacity.unwrap_or(self.inner.default_capacity);
        let shared = Arc::new(SubscriberShared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            drops: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            capacity,
        });
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .expect("bus lock poisoned")
            .push(SubscriberEntry {
                id,
                filter,
                shared: Arc::clone(&shared),
            });
        Subscription {
            id,
            shared,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publish one event.  Never blocks and never fails; full subscriber
    /// queues lose their oldest entry.
    pub fn publish(&self, server_id: Uuid, event: Event, raw_line: &str) {
        let subscribers = self.inner.subscribers.read().expect("bus lock poisoned");
        for entry in subscribers.iter() {
            if entry.shared.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if !entry.filter.matches(server_id, &event) {
                continue;
            }
            let envelope = EventEnvelope {
                server_id,
                event: event.clone(),
                raw_line: raw_line.to_owned(),
            };
            {
                let mut queue = entry.shared.queue.lock().expect("queue lock poisoned");
                if queue.len() == entry.shared.capacity {
                    queue.pop_front();
                    entry.shared.drops.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(envelope);
            }
            entry.shared.notify.notify_one();
        }
    }

    /// Number of live subscribers (for status reporting).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().expect("bus lock poisoned").len()
    }

    fn unsubscribe(inner: &BusInner, id: u64) {
        inner
            .subscribers
            .write()
            .expect("bus lock poisoned")
            .retain(|e| e.id != id);
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Reader side of one subscription.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) detaches it
/// from the bus; any queued events are discarded.
pub struct Subscription {
    id: u64,
    shared: Arc<SubscriberShared>,
    bus: std::sync::Weak<BusInner>,
}

impl Subscription {
    /// Receive the next event, waiting if the queue is empty.
    ///
    /// Returns `None` after [`Subscription::cancel`] once the queue drains.
    pub async fn recv(&self) -> Option<EventEnvelope> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(envelope) = self
                .shared
                .queue
                .lock()
                .expect("queue lock poisoned")
                .pop_front()
            {
                return Some(envelope);
            }
            if self.shared.cancelled.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<EventEnvelope> {
        self.shared
            .queue
            .lock()
            .expect("queue lock poisoned")
            .pop_front()
    }

    /// Events lost to queue overflow so far.
    pub fn drop_count(&self) -> u64 {
        self.shared.drops.load(Ordering::Relaxed)
    }

    /// Detach from the bus.  Pending events remain readable until drained.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        if let Some(inner) = self.bus.upgrade() {
            EventBus::unsubscribe(&inner, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TickRate;

    fn tick(chain: &str) -> Event {
        Event::TickRate(TickRate {
            time: "t".to_owned(),
            chain_id: chain.to_owned(),
            tick_rate: "40.0".to_owned(),
        })
    }

    fn chain_of(envelope: &EventEnvelope) -> String {
        match &envelope.event {
            Event::TickRate(t) => t.chain_id.clone(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_in_publication_order() {
        let bus = EventBus::default();
        let sub = bus.subscribe(SubscriptionFilter::all());
        let server = Uuid::new_v4();
        for i in 0..5 {
            bus.publish(server, tick(&i.to_string()), "raw");
        }
        for i in 0..5 {
            let envelope = sub.recv().await.unwrap();
            assert_eq!(chain_of(&envelope), i.to_string());
            assert_eq!(envelope.server_id, server);
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::default();
        let sub = bus.subscribe(SubscriptionFilter::all().queue_capacity(2));
        let server = Uuid::new_v4();
        for i in 0..10 {
            bus.publish(server, tick(&i.to_string()), "raw");
        }
        // The two newest events survive; the other eight are counted as drops.
        assert_eq!(chain_of(&sub.recv().await.unwrap()), "8");
        assert_eq!(chain_of(&sub.recv().await.unwrap()), "9");
        assert_eq!(sub.drop_count(), 8);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn kind_filter_excludes_other_kinds() {
        let bus = EventBus::default();
        let sub = bus.subscribe(SubscriptionFilter::all().kind(EventKind::NewGame));
        bus.publish(Uuid::new_v4(), tick("1"), "raw");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn server_filter_excludes_other_servers() {
        let bus = EventBus::default();
        let mine = Uuid::new_v4();
        let sub = bus.subscribe(SubscriptionFilter::all().server(mine));
        bus.publish(Uuid::new_v4(), tick("1"), "raw");
        bus.publish(mine, tick("2"), "raw");
        let envelope = sub.recv().await.unwrap();
        assert_eq!(chain_of(&envelope), "2");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn cancel_wakes_pending_recv() {
        let bus = EventBus::default();
        let sub = Arc::new(bus.subscribe(SubscriptionFilter::all()));
        let waiter = Arc::clone(&sub);
        let handle = tokio::spawn(async move { waiter.recv().await });
        tokio::task::yield_now().await;
        sub.cancel();
        assert!(handle.await.unwrap().is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::default();
        bus.publish(Uuid::new_v4(), tick("1"), "raw");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
