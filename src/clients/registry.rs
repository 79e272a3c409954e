use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{Connection, Subscriber};

/// Messages waiting for a single subscriber. Beyond this the subscriber is considered stalled and
/// new messages for it are dropped.
pub(crate) const OUTBOX_CAPACITY: usize = 256;

/// Queue feeding a subscriber's delivery task.
type Outbox = mpsc::Sender<Arc<str>>;

/// Set of all connected subscribers.
///
/// Broadcasting only queues the message: each subscriber has its own delivery task that writes
/// to the connection. A slow or broken connection therefore delays nobody but itself, and every
/// subscriber sees messages in the order they were queued. A subscriber that stops reading loses
/// messages once [OUTBOX_CAPACITY] are waiting for it.
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    members: Mutex<BTreeMap<u64, Outbox>>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            members: Mutex::new(BTreeMap::new()),
        }
    }

    fn members(&self) -> MutexGuard<'_, BTreeMap<u64, Outbox>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection and starts its delivery task. Must be called within a tokio runtime.
    pub fn register(&self, connection: Box<dyn Connection>) -> Arc<Subscriber> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(id, connection));
        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);

        tokio::spawn(
            deliver(subscriber.clone(), inbox).instrument(info_span!("client", id = subscriber.id)),
        );

        self.members().insert(id, outbox);
        info!("Client {id} connected");
        subscriber
    }

    /// Removes a subscriber. Messages already queued for it are still delivered. Returns false if
    /// it wasn't registered.
    pub fn unregister(&self, subscriber: &Subscriber) -> bool {
        let removed = self.members().remove(&subscriber.id).is_some();
        if removed {
            info!("Client {} disconnected", subscriber.id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `message` for a single subscriber.
    pub fn send_to(&self, subscriber: &Subscriber, message: impl Into<Arc<str>>) -> bool {
        match self.members().get(&subscriber.id) {
            Some(outbox) => enqueue(subscriber.id, outbox, message.into()),
            None => false,
        }
    }

    /// Queues `message` for every current subscriber and returns how many it was queued for.
    /// Never blocks on I/O.
    pub fn broadcast(&self, message: impl Into<Arc<str>>) -> usize {
        let message = message.into();
        let members = self.members();
        let mut queued = 0;
        for (id, outbox) in members.iter() {
            debug!("Queueing message for client {id}");
            if enqueue(*id, outbox, message.clone()) {
                queued += 1;
            }
        }
        queued
    }
}

fn enqueue(id: u64, outbox: &Outbox, message: Arc<str>) -> bool {
    match outbox.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Client {id} isn't keeping up, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("Delivery to client {id} has stopped, skipping");
            false
        }
    }
}

/// Writes queued messages to the subscriber until it is unregistered. Failures are logged and
/// don't stop delivery of later messages.
async fn deliver(subscriber: Arc<Subscriber>, mut inbox: mpsc::Receiver<Arc<str>>) {
    while let Some(message) = inbox.recv().await {
        debug!("Sending message to client {}", subscriber.id);
        if let Err(e) = subscriber.send(&message).await {
            warn!("Send to client {} failed, ignoring: {e:?}", subscriber.id);
        }
    }
    debug!("Delivery to client {} finished", subscriber.id);
}
