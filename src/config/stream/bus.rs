use tokio::sync::broadcast;
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use uuid::Uuid;

use super::event::InstanceEvent;

const BUS_CAPACITY: usize = 2048;

/// Fan-out of instance events to any number of observers.
///
/// Each [`crate::server::domain::Server`] gets a clone at construction;
/// subscribers that fall behind by more than the channel capacity observe a
/// lag error and skip ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InstanceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            tx: broadcast::Sender::new(BUS_CAPACITY),
        }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: InstanceEvent) {
        _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> BroadcastStream<InstanceEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Events of a single instance only.
    pub fn subscribe_server(
        &self,
        server: Uuid,
    ) -> impl Stream<Item = Result<InstanceEvent, BroadcastStreamRecvError>> + Send + 'static {
        self.subscribe().filter(move |event| match event {
            Ok(event) => event.server == server,
            Err(_) => true,
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
