use std::sync::Arc;

use tracing::debug;

use crate::{
    clients::{registry::SubscriberRegistry, Connection, Subscriber},
    tracker::{command::Command, state::Snapshot, Tracker},
};

/// Ties the tracker to its viewers: every mutation is followed by a broadcast of the resulting
/// snapshot to all subscribers.
pub struct PunchClock {
    tracker: Arc<Tracker>,
    clients: SubscriberRegistry,
}

impl PunchClock {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            tracker,
            clients: SubscriberRegistry::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn clients(&self) -> &SubscriberRegistry {
        &self.clients
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tracker.snapshot()
    }

    /// Executes `command` and returns the snapshot after it. Anything but a pure refresh is
    /// broadcast to all subscribers, even if it turned out to be a no-op.
    pub fn handle(&self, command: &Command) -> Snapshot {
        let action = command.action();
        debug!(?action, "Handling command");
        let broadcast = action.is_mutation();
        self.tracker.apply(&action, |snapshot| {
            if broadcast {
                let queued = self.clients.broadcast(snapshot.to_json());
                debug!("Snapshot queued for {queued} clients");
            }
        })
    }

    /// Registers a new viewer. The current snapshot is its first message.
    pub fn subscribe(&self, connection: Box<dyn Connection>) -> Arc<Subscriber> {
        self.tracker.with_snapshot(|snapshot| {
            let subscriber = self.clients.register(connection);
            self.clients.send_to(&subscriber, snapshot.to_json());
            subscriber
        })
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        self.clients.unregister(subscriber);
    }
}
