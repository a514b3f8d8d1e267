//! Activity broadcast hub: named fan-out channels with best-effort,
//! at-most-once delivery to whoever is connected right now.
//!
//! The hub holds only [`Weak`] references to subscribers. A subscriber whose
//! owner went away, or whose delivery reports [`DeliveryError::Closed`], is
//! evicted during publish. A full subscriber misses that one event and stays
//! registered. Delivery never blocks, so one bad subscriber cannot hold up
//! the others.

pub mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

pub use events::{ActivityKind, HubEvent, ProgressEnvelope, WorkerActivity, WorkerError};

/// Channel for brainstorming-session chatter.
pub const CHANNEL_BRAINSTORM: &str = "brainstorm";
/// Channel carrying orchestration progress events.
pub const CHANNEL_ORCHESTRATION: &str = "orchestration";
/// Channel carrying worker activity, metrics and errors.
pub const CHANNEL_WORKERS: &str = "workers";

/// Why a single delivery did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber is alive but cannot take more right now.
    Full,
    /// The subscriber is gone; it will be evicted.
    Closed,
}

/// A connected observer.
pub trait Subscriber: Send + Sync {
    /// Hand over one event without blocking.
    fn try_deliver(&self, event: &HubEvent) -> Result<(), DeliveryError>;
}

// Compile-time check: Subscriber must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Subscriber) {}
};

/// Identifies one registration on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    subscriber: Weak<dyn Subscriber>,
}

/// The broadcast hub. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct Hub {
    channels: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.lock();
        let counts: HashMap<&str, usize> = channels.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("Hub").field("channels", &counts).finish()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `subscriber` on `channel`. The hub keeps only a weak
    /// reference; the caller stays responsible for keeping it alive.
    pub fn subscribe(&self, channel: &str, subscriber: &Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(channel.to_string()).or_default().push(Entry {
            id,
            subscriber: Arc::downgrade(subscriber),
        });
        debug!(channel, subscription = id.0, "subscriber connected");
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut channels = self.lock();
        let Some(entries) = channels.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Deliver `event` to every live subscriber on `channel`. Returns how many
    /// subscribers accepted it.
    pub fn publish(&self, channel: &str, event: &HubEvent) -> usize {
        let mut evict = Vec::new();
        let live: Vec<(SubscriptionId, Arc<dyn Subscriber>)> = {
            let channels = self.lock();
            let Some(entries) = channels.get(channel) else {
                return 0;
            };
            entries
                .iter()
                .filter_map(|e| match e.subscriber.upgrade() {
                    Some(s) => Some((e.id, s)),
                    None => {
                        evict.push(e.id);
                        None
                    }
                })
                .collect()
        };

        let mut delivered = 0;
        for (id, subscriber) in live {
            match subscriber.try_deliver(event) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    debug!(channel, subscription = id.0, "subscriber lagging, event dropped");
                }
                Err(DeliveryError::Closed) => evict.push(id),
            }
        }

        if !evict.is_empty() {
            let mut channels = self.lock();
            if let Some(entries) = channels.get_mut(channel) {
                entries.retain(|e| !evict.contains(&e.id));
                if entries.is_empty() {
                    channels.remove(channel);
                }
            }
            debug!(channel, evicted = evict.len(), "evicted disconnected subscribers");
        }

        delivered
    }

    /// Number of registrations on `channel`, including ones not yet noticed
    /// as dead.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map(Vec::len).unwrap_or(0)
    }

    /// Channels with at least one registration.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Connect a queue-backed subscriber holding up to `capacity` undelivered
    /// events. Dropping the returned [`Subscription`] disconnects it.
    pub fn connect(&self, channel: &str, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber: Arc<dyn Subscriber> = Arc::new(QueueSubscriber { tx });
        let id = self.subscribe(channel, &subscriber);
        Subscription {
            id,
            channel: channel.to_string(),
            _subscriber: subscriber,
            rx,
        }
    }
}

/// Subscriber backed by a bounded tokio channel.
struct QueueSubscriber {
    tx: mpsc::Sender<HubEvent>,
}

impl Subscriber for QueueSubscriber {
    fn try_deliver(&self, event: &HubEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// A live connection created by [`Hub::connect`]. It is the only strong owner
/// of its subscriber.
pub struct Subscription {
    id: SubscriptionId,
    channel: String,
    _subscriber: Arc<dyn Subscriber>,
    rx: mpsc::Receiver<HubEvent>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued right now.
    pub fn drain(&mut self) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Turn the subscription into a stream; the connection lives as long as
    /// the stream does.
    pub fn into_stream(self) -> impl Stream<Item = HubEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.rx.recv().await?;
            Some((event, sub))
        })
    }
}
