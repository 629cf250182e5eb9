use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;

/// Fans one producer's sequence out to many bounded subscriber queues.
///
/// Publishing never waits: a subscriber whose queue is full misses that
/// item and everyone else still receives it.
pub struct BroadcastHub<T> {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<T>>>,
    latest: Mutex<Option<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> fmt::Debug for BroadcastHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscribers.lock().len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            latest: Mutex::new(None),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::now_v7();
        self.subscribers.lock().insert(id, tx);
        debug!(subscriber = %id, "progress subscriber registered");

        Subscription {
            id,
            receiver: rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "progress subscriber removed");
        }
        removed
    }

    /// Delivers `item` to every subscriber with room. Returns how many
    /// queues accepted it.
    pub fn publish(&self, item: T) -> usize {
        *self.latest.lock() = Some(item.clone());

        let targets: Vec<(Uuid, mpsc::Sender<T>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(subscriber = %id, "subscriber queue full, dropping update");
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in gone {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Closes every subscriber queue and forgets the last item. Subscribers
    /// drain what is queued, then observe the end of the sequence.
    pub fn close_all(&self) {
        let closed = {
            let mut subscribers = self.subscribers.lock();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        *self.latest.lock() = None;
        debug!(closed, "progress hub closed all subscribers");
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving side of one hub registration. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: Uuid,
    receiver: mpsc::Receiver<T>,
    hub: Weak<BroadcastHub<T>>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T> Subscription<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next item, or `None` once the hub closed this subscriber.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.lock().remove(&self.id);
        }
    }
}
