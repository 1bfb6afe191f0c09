// MIT License - Copyright (c) 2026 Peter Wright
// Host entity registry port

use tracing::trace;

use crate::entity::EntitySnapshot;
use crate::event::{event_channel, BridgeEvent, EventReceiver, EventSender};

/// Host-side registry that presents entities.
///
/// The reconciler only calls `update_state` for entities that have
/// already been passed to `add_entities`.
pub trait EntityRegistry: Send + Sync {
    fn add_entities(&self, entities: Vec<EntitySnapshot>);

    fn update_state(&self, entity: EntitySnapshot);

    fn remove_entities(&self, unique_ids: Vec<String>) {
        let _ = unique_ids;
    }
}

/// Registry that republishes everything on a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    tx: EventSender,
}

impl EventRegistry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = event_channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    fn emit(&self, event: BridgeEvent) {
        // No subscribers is not an error; the event is simply dropped.
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EntityRegistry for EventRegistry {
    fn add_entities(&self, entities: Vec<EntitySnapshot>) {
        self.emit(BridgeEvent::EntitiesAdded(entities));
    }

    fn update_state(&self, entity: EntitySnapshot) {
        self.emit(BridgeEvent::StateChanged(entity));
    }

    fn remove_entities(&self, unique_ids: Vec<String>) {
        self.emit(BridgeEvent::EntitiesRemoved(unique_ids));
    }
}
