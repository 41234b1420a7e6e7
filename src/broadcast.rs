use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub type SubscriberId = u64;

/// Receiving end handed to a subscriber.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

/// Best-effort fan-out to live subscribers.
///
/// Each subscriber owns a bounded queue. `publish` snapshots the subscriber
/// set and uses `try_send`, so it never waits on anyone: a full queue loses
/// that message for that subscriber only, and a closed queue removes the
/// subscriber. Nothing is replayed to late or lagging subscribers.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "subscriber added");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id, "subscriber removed");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn publish(&self, message: Arc<str>) -> PublishReport {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Arc<str>>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = PublishReport::default();
        let mut gone = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    debug!(subscriber = id, "subscriber lagging, message dropped");
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.lock();
            for id in gone {
                if subscribers.remove(&id).is_some() {
                    report.removed += 1;
                    debug!(subscriber = id, "subscriber disconnected, removed");
                }
            }
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Arc<str>>>> {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner())
    }
}
