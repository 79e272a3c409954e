//! Live update subscribers. Every connected viewer is a [Subscriber] held by the
//! [registry::SubscriberRegistry], which fans snapshots out to all of them.

pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Outgoing half of a live connection.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, text: &str) -> Result<()>;
}

/// One connected viewer. The connection is guarded by its own lock so that concurrent writers to
/// the same connection are serialized without holding up anyone else.
pub struct Subscriber {
    id: u64,
    connection: Mutex<Box<dyn Connection>>,
}

impl Subscriber {
    pub(crate) fn new(id: u64, connection: Box<dyn Connection>) -> Self {
        Self {
            id,
            connection: Mutex::new(connection),
        }
    }

    /// Diagnostic identity. Never reused, never used for addressing.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        self.connection.lock().await.send(text).await
    }
}
