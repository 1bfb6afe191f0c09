// MIT License - Copyright (c) 2026 Peter Wright
// Bridge events

use crate::entity::EntitySnapshot;

/// All events that can be emitted by the bridge.
///
/// Consumers subscribe via `EventRegistry::subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Entities registered at setup, with the state they were added with
    EntitiesAdded(Vec<EntitySnapshot>),
    /// A registered entity was refreshed
    StateChanged(EntitySnapshot),
    /// Entities withdrawn at unload
    EntitiesRemoved(Vec<String>),
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
